//! Error taxonomy for the gateway.
//!
//! Every failure is scoped to one request or connection; nothing here is
//! fatal to the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or disallowed input, surfaced verbatim to the caller.
    #[error("{0}")]
    Validation(String),

    /// Payload over the submission size limit.
    #[error("{0}")]
    SizeExceeded(String),

    /// Unknown or expired job, or unknown upload.
    #[error("{0}")]
    NotFound(String),

    /// Submission rejected by the admission controller.
    #[error("rate limit exceeded, maximum {0} executions per minute")]
    RateLimited(u32),

    /// Polling budget exhausted while the job was still pending.
    #[error("execution timed out")]
    Timeout,

    /// Durable store failure. Logged in full, surfaced as a generic
    /// internal error so infrastructure details never reach the caller.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            GatewayError::SizeExceeded(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            GatewayError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            GatewayError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            GatewayError::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            GatewayError::Store(err) => {
                error!(%err, "store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            GatewayError::Io(err) => {
                error!(%err, "io failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
