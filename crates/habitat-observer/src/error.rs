//! Error types for the HTTP API.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use habitat_ingest::IngestError;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body was rejected.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A response body could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<IngestError> for ObserverError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnknownSensor { .. } => Self::NotFound(err.to_string()),
            IngestError::InvalidDescriptor { .. } | IngestError::InvalidReading { .. } => {
                Self::BadRequest(err.to_string())
            }
            IngestError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Serialization(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
