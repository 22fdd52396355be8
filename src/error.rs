/// Unified error types for the Lotkeeper account service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the account service
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Lookup miss (account, token, email)
    #[error("Not found: {0}")]
    NotFound(String),

    /// State conflicts (already blocked/unblocked, duplicate login or email)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad login or password; also covers unknown logins so their
    /// existence is never revealed
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Login attempted before the account completed registration
    #[error("Account is not activated")]
    NotActivated,

    /// Login attempted against an administratively blocked account
    #[error("Account has been blocked by an administrator")]
    BlockedByAdmin,

    /// Login attempted against an account locked out by failed attempts
    #[error("Account is blocked after too many failed login attempts")]
    BlockedByFailedAttempts,

    /// Bad signature, wrong subject and expiry all collapse here
    #[error("Token is invalid or has expired")]
    InvalidOrExpiredToken,

    /// Profile edit raced with another writer; caller must refetch
    #[error("Account was modified concurrently")]
    OptimisticLock,

    /// Structurally disallowed actions (blocking own account, removing
    /// the last role, self-demotion from admin)
    #[error("Operation not allowed: {0}")]
    IllegalOperation(String),

    /// Unparseable scheduler/config property; aborts the affected job only
    #[error("Configuration error: {0}")]
    Config(String),

    /// A confirm-email token without a pending address is a server-side
    /// invariant violation, not a user error
    #[error("Email change token carries no pending address")]
    MissingPendingEmail,

    /// Request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert ServiceError to HTTP response
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ServiceError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "InvalidCredentials",
                self.to_string(),
            ),
            ServiceError::NotActivated => (
                StatusCode::UNAUTHORIZED,
                "NotActivated",
                self.to_string(),
            ),
            ServiceError::BlockedByAdmin => (
                StatusCode::UNAUTHORIZED,
                "BlockedByAdmin",
                self.to_string(),
            ),
            ServiceError::BlockedByFailedAttempts => (
                StatusCode::UNAUTHORIZED,
                "BlockedByFailedAttempts",
                self.to_string(),
            ),
            ServiceError::InvalidOrExpiredToken => (
                StatusCode::BAD_REQUEST,
                "InvalidOrExpiredToken",
                self.to_string(),
            ),
            ServiceError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            ServiceError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            ServiceError::Conflict(_) => (
                StatusCode::CONFLICT,
                "Conflict",
                self.to_string(),
            ),
            ServiceError::OptimisticLock => (
                StatusCode::CONFLICT,
                "OptimisticLockConflict",
                self.to_string(),
            ),
            ServiceError::IllegalOperation(_) => (
                StatusCode::FORBIDDEN,
                "IllegalOperation",
                self.to_string(),
            ),
            ServiceError::Database(_)
            | ServiceError::Internal(_)
            | ServiceError::Io(_)
            | ServiceError::Config(_)
            | ServiceError::MissingPendingEmail => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for account service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
