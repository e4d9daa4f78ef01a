//! Error types and HTTP error responses for the daemon.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use facegate_core::service::ServiceError;
use facegate_core::types::ValidationError;

use crate::engine::EngineError;
use crate::http::ApiResponse;

/// Application-level error type.
#[derive(Debug)]
pub enum ApiError {
    /// Bad identity or image input.
    Validation(ValidationError),
    /// A request body could not be deserialized.
    BadRequest(String),
    /// The request body is over the configured limit.
    PayloadTooLarge(String),
    NotFound(String),
    /// Store or analyzer failure.
    Internal(String),
    /// The engine thread is gone or did not answer in time.
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        (status, axum::Json(ApiResponse::<()>::failure(message))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge(rejection.body_text());
        }
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Service(ServiceError::Validation(v)) => ApiError::Validation(v),
            EngineError::Service(other) => {
                tracing::error!(error = %other, "request failed");
                ApiError::Internal(other.to_string())
            }
            gone @ (EngineError::ChannelClosed | EngineError::Spawn(_)) => {
                tracing::error!(error = %gone, "engine unavailable");
                ApiError::Unavailable("Face engine unavailable".to_string())
            }
        }
    }
}
