// =============================================================================
// ERROR MODULE
// =============================================================================
// Service-level error type and its HTTP mapping.
//
// Every store operation returns `AppResult<T>`; nothing is thrown past the
// handler. The response body is always `{ success: false, error, code }`, and
// the `error` text carries the backend's own message when the failure came
// from the document store, so the client can show "<action> failed: <why>".
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::{ErrorResponse, OrderStatus};
use crate::sync::StoreError;

// =============================================================================
// CUSTOM ERROR TYPE
// =============================================================================
#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // BACKEND ERRORS
    // -------------------------------------------------------------------------
    /// Read/write/timeout failure reported by the active document backend
    #[error(transparent)]
    Store(#[from] StoreError),

    // -------------------------------------------------------------------------
    // BUSINESS LOGIC ERRORS
    // -------------------------------------------------------------------------
    /// Rejected before any write was attempted
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced product / order / cart line no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// Order status change outside the allowed sequence
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The resolved product or variant has no stock
    #[error("Out of stock: {0}")]
    OutOfStock(String),

    /// Another submission for the same session is still in flight
    #[error("Conflict: {0}")]
    Conflict(String),

    // -------------------------------------------------------------------------
    // INTERNAL ERRORS
    // -------------------------------------------------------------------------
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// HTTP RESPONSE CONVERSION
// =============================================================================
impl AppError {
    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),

            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),

            AppError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Cannot move order from {} to {}", from, to),
            ),

            AppError::OutOfStock(msg) => (StatusCode::CONFLICT, "OUT_OF_STOCK", msg.clone()),

            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // The timeout is reported separately so clients can offer a retry
            AppError::Store(StoreError::Timeout(_)) => (
                StatusCode::GATEWAY_TIMEOUT,
                "BACKEND_TIMEOUT",
                self.to_string(),
            ),

            AppError::Store(StoreError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BACKEND_UNAVAILABLE",
                self.to_string(),
            ),

            AppError::Store(StoreError::Read(_)) => {
                (StatusCode::BAD_GATEWAY, "READ_FAILURE", self.to_string())
            }

            AppError::Store(StoreError::Write(_)) => {
                (StatusCode::BAD_GATEWAY, "WRITE_FAILURE", self.to_string())
            }

            AppError::Store(StoreError::Serialization(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATA_ERROR",
                self.to_string(),
            ),

            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();

        tracing::error!(
            error_code = error_code,
            message = %message,
            "Request failed"
        );

        let body = ErrorResponse::new(error_code, message);

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// RESULT TYPE ALIAS
// =============================================================================
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (
                AppError::InvalidTransition {
                    from: OrderStatus::Pending,
                    to: OrderStatus::Delivered,
                },
                StatusCode::CONFLICT,
            ),
            (
                AppError::Store(StoreError::Timeout(Duration::from_secs(15))),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                AppError::Store(StoreError::Write("permission denied".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected);
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_store_message_is_preserved() {
        let err = AppError::from(StoreError::Write("quota exceeded".into()));
        assert!(err.to_string().contains("quota exceeded"));
    }
}
