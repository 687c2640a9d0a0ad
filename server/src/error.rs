use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stream_core::job::ParameterError;
use stream_core::session::SessionError;
use stream_core::supervisor::SupervisorError;
use thiserror::Error;

/// API Error types
///
/// Only errors raised before the first stream byte reach the client; once
/// the body has started, failures are logged and recorded on the session.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Generator error: {0}")]
    Generator(#[from] SupervisorError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<ParameterError> for ApiError {
    fn from(e: ParameterError) -> Self {
        ApiError::InvalidInput(e.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        ApiError::InternalError(e.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Generator(SupervisorError::StartupTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Generator(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            ApiError::InvalidInput(msg) => msg,
            ApiError::Generator(e) => {
                tracing::error!("Generator error: {}", e);
                format!("Generator error: {}", e)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                msg
            }
            ApiError::NotFound(msg) => msg,
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
