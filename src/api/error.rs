//! API error types with structured JSON responses.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::bridge::BridgeError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Script failed: {0}")]
    ScriptFailed(String),
    #[error("Script timed out: {0}")]
    ScriptTimeout(String),
    #[error("Could not start script: {0}")]
    SpawnFailed(String),
    #[error("Unreadable script output: {0}")]
    ParseFailed(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail.clone()),
            ApiError::PayloadTooLarge(detail) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                detail.clone(),
            ),
            // Script stderr is the only diagnostic the client gets.
            ApiError::ScriptFailed(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SCRIPT_FAILED",
                detail.clone(),
            ),
            ApiError::ScriptTimeout(detail) => {
                (StatusCode::GATEWAY_TIMEOUT, "SCRIPT_TIMEOUT", detail.clone())
            }
            ApiError::SpawnFailed(detail) => {
                tracing::error!(detail, "Script could not be started");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SPAWN_FAILED",
                    "The inference runtime could not be started".to_string(),
                )
            }
            ApiError::ParseFailed(detail) => {
                tracing::error!(detail, "Script output rejected");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PARSE_FAILED",
                    "The inference script returned unreadable output".to_string(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::BadInput(detail) => ApiError::BadRequest(detail),
            e @ BridgeError::ScriptFailure { .. } => ApiError::ScriptFailed(e.to_string()),
            e @ BridgeError::Timeout { .. } => ApiError::ScriptTimeout(e.to_string()),
            e @ BridgeError::Spawn { .. } => ApiError::SpawnFailed(e.to_string()),
            BridgeError::Parse(detail) => ApiError::ParseFailed(detail),
            e @ (BridgeError::Io(_) | BridgeError::Cleanup { .. }) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}
