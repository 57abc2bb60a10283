//! API error types and JSON response formatting.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details in the response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that converts to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Malformed request error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
    }

    /// Internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidInput(_) | Error::Config(_) => Self::invalid_input(message),
            Error::DuplicateName(name) => {
                Self::new(StatusCode::CONFLICT, "DUPLICATE_NAME", message)
                    .with_details(serde_json::json!({ "connection": name }))
            }
            Error::ConnectionNotFound(name) => {
                Self::new(StatusCode::NOT_FOUND, "CONNECTION_NOT_FOUND", message)
                    .with_details(serde_json::json!({ "connection": name }))
            }
            Error::KeyNotFound { connection, key } => {
                Self::new(StatusCode::NOT_FOUND, "KEY_NOT_FOUND", message)
                    .with_details(serde_json::json!({ "connection": connection, "key": key }))
            }
            Error::KeyspaceNotFound { location, keyspace } => {
                Self::new(StatusCode::NOT_FOUND, "KEYSPACE_NOT_FOUND", message).with_details(
                    serde_json::json!({ "location": location, "keyspace": keyspace }),
                )
            }
            Error::ScanPartialFailure {
                connection,
                keys_scanned,
                ..
            } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "SCAN_PARTIAL_FAILURE",
                message,
            )
            .with_details(serde_json::json!({
                "connection": connection,
                "keys_scanned": keys_scanned,
            })),
            Error::Cancelled(_) => Self::new(StatusCode::CONFLICT, "CANCELLED", message),
            Error::Export {
                key,
                written,
                total,
                ..
            } => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_FAILED", message)
                .with_details(serde_json::json!({
                    "key": key,
                    "bytes_written": written,
                    "total_bytes": total,
                })),
            Error::Io(_) | Error::Registry(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", message)
            }
            Error::Engine(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", message)
            }
            Error::Worker(_) => Self::internal(message),
        }
    }
}
