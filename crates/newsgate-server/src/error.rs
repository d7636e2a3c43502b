//! API error types for the newsgate webhook ingress server.
//!
//! Maps core domain errors to HTTP status codes and JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use newsgate_core::error::{QueueError, StorageError};
use serde_json::json;

/// API error type for route handlers.
pub enum ApiError {
    /// Request failed authentication (bad bearer token or HMAC signature).
    Unauthorized,
    /// Request body was not valid JSON or was missing required fields.
    BadRequest(String),
    /// Durable queue write failed.
    Queue(QueueError),
    /// Database error.
    Storage(StorageError),
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Queue(e) => {
                tracing::error!("queue error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Storage(e) => {
                tracing::error!("storage error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
