//! Webhook-specific error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur in the admission webhook
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            WebhookError::Tls(_) | WebhookError::Io(_) | WebhookError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}
