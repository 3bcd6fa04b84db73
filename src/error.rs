/// Unified error types for Propel Hub
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the hub
#[derive(Error, Debug)]
pub enum HubError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Token or account lookup misses
    #[error("Not found: {0}")]
    NotFound(String),

    /// Token was already redeemed
    #[error("Token already used")]
    AlreadyUsed,

    /// Token was revoked by its issuer
    #[error("Token revoked")]
    Revoked,

    /// Token expired before redemption
    #[error("Token expired")]
    Expired,

    /// Code generation kept colliding with existing codes
    #[error("Could not generate a unique code")]
    DuplicateCode,

    /// Platform identity already linked to a different account
    #[error("Platform identity already linked to another account")]
    AlreadyLinked,

    /// Link token rejected, carrying the underlying cause
    #[error("Link token rejected: {0}")]
    TokenInvalid(#[source] Box<HubError>),

    /// Daily request quota exhausted
    #[error("Daily quota of {limit} requests exhausted")]
    QuotaExceeded {
        limit: i64,
        resets_at: DateTime<Utc>,
    },

    /// Operation not permitted in the current token state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transport-level rate limiting
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Internal server errors, including invariant violations
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert HubError to HTTP response
impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            HubError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            HubError::Authorization(_) => (
                StatusCode::FORBIDDEN,
                "Forbidden",
                self.to_string(),
            ),
            HubError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            HubError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            HubError::AlreadyUsed => (
                StatusCode::CONFLICT,
                "AlreadyUsed",
                self.to_string(),
            ),
            HubError::Revoked => (
                StatusCode::CONFLICT,
                "Revoked",
                self.to_string(),
            ),
            HubError::Expired => (
                StatusCode::GONE,
                "Expired",
                self.to_string(),
            ),
            HubError::DuplicateCode => (
                StatusCode::CONFLICT,
                "DuplicateCode",
                self.to_string(),
            ),
            HubError::AlreadyLinked => (
                StatusCode::CONFLICT,
                "AlreadyLinked",
                self.to_string(),
            ),
            HubError::TokenInvalid(_) => (
                StatusCode::BAD_REQUEST,
                "TokenInvalid",
                self.to_string(),
            ),
            HubError::QuotaExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "QuotaExceeded",
                self.to_string(),
            ),
            HubError::InvalidState(_) => (
                StatusCode::CONFLICT,
                "InvalidState",
                self.to_string(),
            ),
            HubError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            HubError::Database(_) | HubError::Internal(_) | HubError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ApiErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for hub operations
pub type HubResult<T> = Result<T, HubError>;
