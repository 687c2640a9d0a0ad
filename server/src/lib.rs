pub mod config;
pub mod error;
pub mod metrics;
pub mod sessions;
pub mod stream;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Path, Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{Html, Response},
    routing::get,
    Json, Router,
};
use stream_core::session::SessionReport;
use stream_core::supervisor::Launcher;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{collect_system_metrics, MetricsResponse, StreamMetrics};
use crate::sessions::SessionRegistry;

const INFO_PAGE: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    pub launcher: Arc<dyn Launcher>,
    pub config: ServerConfig,
    pub metrics: StreamMetrics,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// State backed by the generator configured in `config`.
    pub fn new(config: ServerConfig) -> Self {
        let launcher = Arc::new(config.supervisor());
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: ServerConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            sessions: SessionRegistry::new(config.session_history),
            metrics: StreamMetrics::new(),
            config,
        }
    }
}

/// Build the application router with its middleware stack.
pub fn create_app(state: AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    // Global limit: all clients share one bucket, refilled evenly over a minute
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = GovernorConfigBuilder::default()
        .per_millisecond((60_000 / u64::from(per_minute)).max(1))
        .burst_size(per_minute)
        .key_extractor(GlobalKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit: {} per minute", per_minute))?;

    // The timeout bounds the time to response headers; a running stream is not cut off
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(Arc::new(governor_conf)))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config));

    let api = Router::new()
        .route("/", get(info_page))
        .route("/stream", get(stream::stream_audio))
        .route("/streams/{id}", get(session_status))
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_endpoint));

    Ok(Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .fallback(not_found)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware)
        .with_state(state))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        if config.cors_allowed_origins.is_some() {
            warn!("CORS_ALLOWED_ORIGINS has no usable origins, falling back to permissive CORS");
        }
        base.allow_origin(tower_http::cors::Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(tower_http::cors::AllowOrigin::list(origins))
    }
}

async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = HeaderValue::from_str(&Uuid::new_v4().to_string()).ok();
    if let Some(id) = &request_id {
        request.headers_mut().insert("x-request-id", id.clone());
    }
    let mut response = next.run(request).await;
    if let Some(id) = request_id {
        response.headers_mut().insert("x-request-id", id);
    }
    response
}

pub async fn info_page() -> Html<&'static str> {
    Html(INFO_PAGE)
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: collect_system_metrics(),
        streams: state.metrics.snapshot(),
    })
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionReport>, ApiError> {
    let not_found = || ApiError::NotFound(format!("No recent stream with id {}", id));
    let uuid = Uuid::parse_str(&id).map_err(|_| not_found())?;
    state.sessions.get(&uuid).map(Json).ok_or_else(not_found)
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
