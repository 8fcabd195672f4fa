use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Fare error: {0}")]
    Fare(#[from] FareError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Errors raised by the ledger transaction executor and its stores
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Concurrent write conflict on account {account_id} after {attempts} attempt(s)")]
    TransactionConflict { account_id: String, attempts: u32 },

    #[error("Duplicate reference {reference} on account {account_id}")]
    DuplicateReference { account_id: String, reference: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Fare computation errors, surfaced with RPC-style codes
#[derive(Error, Debug)]
pub enum FareError {
    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AppError {
    /// Whether retrying the same request later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Internal(_)
                | AppError::Ledger(LedgerError::TransactionConflict { .. })
        )
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let description = self.to_string();
        let (status, error_code, message, details) = match self {
            AppError::Fare(FareError::Unauthenticated) | AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required".to_string(),
                None,
            ),
            AppError::Fare(FareError::InvalidArgument(msg)) => (
                StatusCode::BAD_REQUEST,
                "invalid-argument",
                msg,
                None,
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Ledger(LedgerError::AccountNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "ACCOUNT_NOT_FOUND",
                format!("Account not found: {}", id),
                Some(serde_json::json!({ "account_id": id })),
            ),
            AppError::Ledger(LedgerError::InvalidAmount(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_AMOUNT", msg, None)
            }
            AppError::Ledger(LedgerError::DuplicateReference { account_id, reference }) => (
                StatusCode::CONFLICT,
                "DUPLICATE_REFERENCE",
                "Operation already applied".to_string(),
                Some(serde_json::json!({ "account_id": account_id, "reference": reference })),
            ),
            AppError::Ledger(LedgerError::TransactionConflict { attempts, .. }) => (
                StatusCode::CONFLICT,
                "TRANSACTION_CONFLICT",
                "Concurrent update, please retry".to_string(),
                Some(serde_json::json!({ "attempts": attempts })),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %description, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
