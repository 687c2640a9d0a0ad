//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use server::{config::ServerConfig, create_app, AppState};
use stream_core::job::JobDescription;
use stream_core::supervisor::{GeneratorCommand, GeneratorProcess, Launcher, Supervisor, SupervisorError};
use tower::ServiceExt;

/// Wraps a real supervisor and counts how many generators were started.
pub struct CountingLauncher {
    inner: Supervisor,
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl Launcher for CountingLauncher {
    async fn start(&self, description: &JobDescription) -> Result<GeneratorProcess, SupervisorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.inner.start(description).await
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    starts: Arc<AtomicUsize>,
}

impl TestApp {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get_json(&self, uri: &str) -> (u16, serde_json::Value) {
        let response = self.get(uri).await;
        let status = response.status().as_u16();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Polls `/streams/{id}` until the session reaches a terminal state.
    pub async fn wait_for_session(&self, id: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (status, report) = self.get_json(&format!("/streams/{}", id)).await;
            if status == 200 {
                let state = report["state"].as_str().unwrap_or_default();
                if ["completed", "aborted", "failed"].contains(&state) {
                    return report;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "session {} never finished",
                id
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        startup_timeout_secs: 5,
        terminate_grace_ms: 500,
        rate_limit_per_minute: 10_000,
        ..ServerConfig::default()
    }
}

pub fn app_with_command(command: GeneratorCommand, config: ServerConfig) -> TestApp {
    let starts = Arc::new(AtomicUsize::new(0));
    let launcher = CountingLauncher {
        inner: Supervisor::new(command).with_terminate_grace(config.terminate_grace()),
        starts: starts.clone(),
    };
    let state = AppState::with_launcher(config, Arc::new(launcher));
    let app = create_app(state.clone()).unwrap();
    TestApp { app, state, starts }
}

/// App whose generator is `sh -c <script>`. The job file path is `$3`.
pub fn shell_app(script: &str) -> TestApp {
    shell_app_with_config(script, test_config())
}

pub fn shell_app_with_config(script: &str, config: ServerConfig) -> TestApp {
    app_with_command(
        GeneratorCommand::new("sh").with_leading_args(["-c", script, "generator"]),
        config,
    )
}

/// Reads a body to the end without buffering it, returning its length.
pub async fn drain_body(body: Body) -> u64 {
    let mut body = body;
    let mut total = 0u64;
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame.unwrap().into_data() {
            total += data.len() as u64;
        }
    }
    total
}

pub fn stream_id(response: &Response<Body>) -> String {
    response
        .headers()
        .get("x-stream-id")
        .expect("x-stream-id header")
        .to_str()
        .unwrap()
        .to_string()
}

#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid, 0) == 0 }
}
