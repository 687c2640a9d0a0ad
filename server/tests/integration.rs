//! Integration tests for the stream server routes

mod common;

use axum::body::to_bytes;
use axum::http::StatusCode;
use stream_core::supervisor::GeneratorCommand;

use common::*;

fn unused_generator() -> TestApp {
    app_with_command(GeneratorCommand::new("/nonexistent/generator"), test_config())
}

#[tokio::test]
async fn test_health_check() {
    let app = unused_generator();
    for uri in ["/health", "/healthz", "/api/health"] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "ok");
    }
}

#[tokio::test]
async fn test_request_id_header() {
    let app = unused_generator();
    let response = app.get("/health").await;
    let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn test_info_page() {
    let app = unused_generator();
    let response = app.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/html"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    for param in ["freq", "duration", "noise", "mode", "carrier", "amplitude"] {
        assert!(html.contains(param), "info page should document {}", param);
    }
    assert!(html.contains("play -t raw -r 44100 -e signed-integer -b 24 -c 2 -"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = unused_generator();
    let (status, body) = app.get_json("/voices").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], 404);
    assert!(body["error"].as_str().unwrap().contains("/voices"));
}

#[tokio::test]
async fn test_invalid_parameters_never_start_generator() {
    let app = unused_generator();
    for query in [
        "freq=0",
        "freq=-2",
        "freq=abc",
        "duration=0",
        "duration=-5",
        "duration=100000",
        "amplitude=150",
        "amplitude=-1",
        "carrier=0",
        "noise=purple",
        "mode=surround",
    ] {
        let (status, body) = app.get_json(&format!("/stream?{}", query)).await;
        assert_eq!(status, 400, "{} should be rejected", query);
        assert_eq!(body["code"], 400);
        assert!(body["error"].is_string());
    }
    assert_eq!(app.starts(), 0);
    assert_eq!(app.state.metrics.snapshot().rejected, 11);
}

#[tokio::test]
async fn test_spawn_failure_is_server_error() {
    let app = unused_generator();
    let (status, body) = app.get_json("/stream?freq=10&duration=1").await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("/nonexistent/generator"));
    assert_eq!(app.starts(), 1);

    let metrics = app.state.metrics.snapshot();
    assert_eq!(metrics.spawn_failures, 1);
    assert_eq!(metrics.started, 0);
}

#[tokio::test]
async fn test_unknown_session() {
    let app = unused_generator();
    let (status, _) = app.get_json(&format!("/streams/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, 404);
    let (status, _) = app.get_json("/api/streams/not-a-uuid").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = unused_generator();
    let _ = app.get_json("/stream?freq=0").await;
    let (status, body) = app.get_json("/metrics").await;
    assert_eq!(status, 200);
    assert!(body["timestamp"].is_string());
    assert!(body["system"]["memory_total_mb"].is_number());
    assert_eq!(body["streams"]["requests"], 1);
    assert_eq!(body["streams"]["rejected"], 1);
}

#[cfg(unix)]
mod generator {
    use super::*;
    use server::config::ServerConfig;

    #[tokio::test]
    async fn test_early_exit_is_reported_before_streaming() {
        let app = shell_app("echo 'line 3: unknown noise' >&2; exit 2");
        let (status, body) = app.get_json("/stream").await;
        assert_eq!(status, 500);
        assert!(body["error"].as_str().unwrap().contains("unknown noise"));
        assert_eq!(app.state.metrics.snapshot().spawn_failures, 1);
    }

    #[tokio::test]
    async fn test_silent_generator_times_out() {
        let config = ServerConfig {
            startup_timeout_secs: 1,
            ..test_config()
        };
        let app = shell_app_with_config("exec sleep 30", config);
        let (status, body) = app.get_json("/stream").await;
        assert_eq!(status, 504);
        assert_eq!(body["code"], 504);
    }

    #[tokio::test]
    async fn test_stream_headers_and_session_report() {
        let app = shell_app("exec head -c 12 /dev/zero");
        let response = app.get("/api/stream?freq=7&mode=monaural").await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers["content-type"], "audio/x-raw");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-audio-format"], "raw");
        assert_eq!(headers["x-audio-samplerate"], "44100");
        assert_eq!(headers["x-audio-bitdepth"], "24");
        assert_eq!(headers["x-audio-channels"], "2");
        assert_eq!(headers["x-audio-encoding"], "signed-integer");
        assert_eq!(headers["x-audio-endianness"], "little");

        let id = stream_id(&response);
        assert_eq!(drain_body(response.into_body()).await, 12);

        let report = app.wait_for_session(&id).await;
        assert_eq!(report["state"], "completed");
        assert_eq!(report["bytes"], 12);
        assert_eq!(report["parameters"]["frequency"], 7.0);
        assert_eq!(report["parameters"]["mode"], "monaural");
    }

    #[tokio::test]
    async fn test_rejected_requests_do_not_evict_session_reports() {
        let config = ServerConfig {
            session_history: 4,
            ..test_config()
        };
        let app = shell_app_with_config("exec head -c 12 /dev/zero", config);

        let response = app.get("/stream?freq=9").await;
        assert_eq!(response.status(), StatusCode::OK);
        let id = stream_id(&response);
        assert_eq!(drain_body(response.into_body()).await, 12);
        app.wait_for_session(&id).await;

        for _ in 0..4 {
            let (status, _) = app.get_json("/stream?freq=0").await;
            assert_eq!(status, 400);
        }
        assert_eq!(app.state.sessions.len(), 1);

        let (status, report) = app.get_json(&format!("/streams/{}", id)).await;
        assert_eq!(status, 200);
        assert_eq!(report["state"], "completed");
    }
}
