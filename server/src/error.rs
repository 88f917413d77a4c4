use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tts_core::GatewayError;

/// Connection-scoped speech failures. The `Display` text is what the client
/// receives in `tts-error`.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Upstream(#[source] GatewayError),

    #[error("{0}")]
    Read(#[source] GatewayError),

    #[error("{0}")]
    Timeout(String),
}

impl SpeechError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SpeechError::InvalidRequest(_) => "invalid_request",
            SpeechError::Upstream(_) => "upstream",
            SpeechError::Read(_) => "read",
            SpeechError::Timeout(_) => "timeout",
        }
    }
}

/// HTTP-level errors for the REST and upgrade endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}
