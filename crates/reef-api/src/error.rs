//! API error types and HTTP response mapping.
//!
//! Error responses are plain text of the form
//! `"{status text}\n\n{message}"`; clients parse the status code, humans
//! read the body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP API error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_text = self.status.canonical_reason().unwrap_or("Error");
        (self.status, format!("{status_text}\n\n{}", self.message)).into_response()
    }
}

impl From<reef_inventory::Error> for ApiError {
    fn from(value: reef_inventory::Error) -> Self {
        match &value {
            reef_inventory::Error::NotFound { .. } => Self::not_found(value.to_string()),
            reef_inventory::Error::InvalidInput { .. } => Self::bad_request(value.to_string()),
            reef_inventory::Error::InvalidStatusTransition { .. }
            | reef_inventory::Error::Storage { .. } => Self::internal(value.to_string()),
        }
    }
}

impl From<reef_scheduler::Error> for ApiError {
    fn from(value: reef_scheduler::Error) -> Self {
        match &value {
            reef_scheduler::Error::NotFound { .. }
            | reef_scheduler::Error::OperationNotFound { .. } => {
                Self::not_found(value.to_string())
            }
            reef_scheduler::Error::Inventory(inner) => match inner {
                reef_inventory::Error::NotFound { .. } => Self::not_found(value.to_string()),
                reef_inventory::Error::InvalidInput { .. } => Self::bad_request(value.to_string()),
                _ => Self::internal(value.to_string()),
            },
            _ => Self::internal(value.to_string()),
        }
    }
}
