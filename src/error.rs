use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors produced by the accounting/matching/scoring core.
///
/// All variants abort the enclosing unit of work, triggering its compensation
/// path before the error reaches the caller. None are retried internally;
/// redelivery is the inbound transport's concern.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input. Fail fast, never retry.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Not enough unused inflow quantity to cover a requested outflow.
    #[error("insufficient entries: {0}")]
    InsufficientEntries(String),
    /// A ledger decrement would drive the balance negative at the insertion point.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    /// Per-key mutual exclusion not obtained within the retry bound.
    #[error("lock timeout: {0}")]
    LockTimeout(String),
    /// A downstream store returned a shape that violates an invariant.
    #[error("unexpected state: {0}")]
    UnexpectedState(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("exchange gateway error: {0}")]
    Gateway(String),
}

/// HTTP-facing error for the query surface.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
