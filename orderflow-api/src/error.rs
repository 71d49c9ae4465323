//! Error Types for the HTTP layer
//!
//! - `ErrorCode` categorizes errors and maps each to an HTTP status
//! - `ApiError` is the JSON body returned for every failed request
//!
//! Internal detail (SQL errors, cache failures) is logged, never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orderflow_core::{OrderflowError, StorageError, TransportError};
use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request contains invalid input data
    InvalidInput,

    /// Request body exceeds the accepted size
    PayloadTooLarge,

    /// Requested order does not exist
    OrderNotFound,

    /// Internal server error
    InternalError,

    /// A backend (store, queue) is unavailable
    ServiceUnavailable,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::OrderNotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input",
            ErrorCode::PayloadTooLarge => "Payload too large",
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn order_not_found() -> Self {
        Self::from_code(ErrorCode::OrderNotFound)
    }

    pub fn internal_error() -> Self {
        Self::from_code(ErrorCode::InternalError)
    }

    pub fn service_unavailable() -> Self {
        Self::from_code(ErrorCode::ServiceUnavailable)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<OrderflowError> for ApiError {
    fn from(err: OrderflowError) -> Self {
        match &err {
            OrderflowError::Storage(StorageError::NotFound { .. }) => ApiError::order_not_found(),
            OrderflowError::Storage(StorageError::Connection { .. })
            | OrderflowError::Connection { .. }
            | OrderflowError::Transport(TransportError::Closed)
            | OrderflowError::Transport(TransportError::Disconnected { .. }) => {
                tracing::error!(error = %err, "Backend unavailable");
                ApiError::service_unavailable()
            }
            OrderflowError::Storage(StorageError::Timeout { .. }) => {
                tracing::error!(error = %err, "Backend timed out");
                ApiError::from_code(ErrorCode::Timeout)
            }
            _ => {
                tracing::error!(error = %err, "Request failed");
                ApiError::internal_error()
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        OrderflowError::from(err).into()
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        OrderflowError::from(err).into()
    }
}
