// Error types for the API server

use crate::{gate::GateClosed, worker::ProcessingError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// API server error types
#[derive(Debug)]
pub enum ApiError {
    /// Missing or non-image upload, or bytes that do not decode.
    InvalidInput(String),
    /// The remover or the PNG encode/save step failed.
    ProcessingFailure(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::ProcessingFailure(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing image: {}", msg),
            ),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            Self::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "status": status.as_u16(),
                "message": error_message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ProcessingError> for ApiError {
    fn from(error: ProcessingError) -> Self {
        Self::ProcessingFailure(error.to_string())
    }
}

impl From<GateClosed> for ApiError {
    fn from(error: GateClosed) -> Self {
        Self::ServiceUnavailable(format!("Server is shutting down: {}", error))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::InternalServerError(format!("Background task failed: {}", error))
    }
}
