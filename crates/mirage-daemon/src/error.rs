//! Error types for mirage-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Startup asset (prompt template / catalog) error
    #[error("Template error: {0}")]
    Template(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Shared key-value store error
    #[error("Shared state error: {0}")]
    SharedState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),

    /// A row decoded into something the domain model rejects
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}

/// Terminal request outcomes that surface as error responses.
///
/// Several of these are deliberate honeypot behavior rather than faults:
/// lock contention answers with an empty response, deep paths disappear
/// without a trace, and 401s mimic a flaky login service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path segment; names the offender like a validation layer would
    #[error("{0}")]
    NotFound(String),

    /// Path too deep to bother with; answered with an empty response
    #[error("no content")]
    NoContent,

    /// Another task is fabricating this fingerprint right now
    #[error("locked, retry later")]
    LockContended,

    /// Missing/invalid/expired bearer token
    #[error("{0}")]
    Unauthorized(String),

    /// Mutation introduced a key the stored resource never had
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Novel-path exploration budget exhausted
    #[error("Rate limit exceeded. Try again later.")]
    RateLimited { retry_after: i64 },

    /// Generative or embedding collaborator failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::NoContent | ApiError::LockContended => {
                StatusCode::NO_CONTENT.into_response()
            }
            ApiError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            ApiError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            ApiError::UnknownField(field) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Unknown field: {field}") })),
            )
                .into_response(),
            ApiError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "Rate limit exceeded. Try again later.",
                    "retry_after": retry_after,
                })),
            )
                .into_response(),
            ApiError::Collaborator(_) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            ApiError::Storage(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
        }
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
