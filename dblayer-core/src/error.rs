//! Error types and result types for database operations.
//!
//! Every public operation returns a [`DatabaseResult<T>`]. Backend-native failures are
//! mapped to one [`DatabaseError`] variant at the adapter boundary, so callers only ever
//! see the status-coded taxonomy below.

use serde_json::Error as SerdeJsonError;
use std::fmt;
use thiserror::Error;

/// HTTP-style status code attached to every [`DatabaseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    BadRequest,
    NotFound,
    Conflict,
    PreconditionFailed,
    TooManyRequests,
    Cancelled,
    InternalServerError,
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric code of this status.
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::Conflict => 409,
            StatusCode::PreconditionFailed => 412,
            StatusCode::TooManyRequests => 429,
            StatusCode::Cancelled => 499,
            StatusCode::InternalServerError => 500,
            StatusCode::ServiceUnavailable => 503,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Represents all possible errors that can occur when interacting with a database backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    /// The item or table was absent when its presence was required.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The supplied conditions evaluated to false against the current item.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    /// A put without overwrite hit an existing key.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Malformed input: invalid attribute path, empty or mixed element arrays, non-array target.
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// The contention retry budget was exhausted.
    #[error("Too many requests: {0}")]
    TooManyRequests(String),
    /// The backend client is not initialized or not reachable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Conversion failures and unexpected backend errors. The original message is preserved.
    #[error("Internal server error: {0}")]
    InternalServerError(String),
    /// The caller cancelled the operation. Writes already committed are not rolled back.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl DatabaseError {
    /// Returns the status code of this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DatabaseError::NotFound(_) => StatusCode::NotFound,
            DatabaseError::PreconditionFailed(_) => StatusCode::PreconditionFailed,
            DatabaseError::Conflict(_) => StatusCode::Conflict,
            DatabaseError::BadRequest(_) => StatusCode::BadRequest,
            DatabaseError::TooManyRequests(_) => StatusCode::TooManyRequests,
            DatabaseError::ServiceUnavailable(_) => StatusCode::ServiceUnavailable,
            DatabaseError::InternalServerError(_) => StatusCode::InternalServerError,
            DatabaseError::Cancelled(_) => StatusCode::Cancelled,
        }
    }

    /// Returns the diagnostic message carried by this error.
    pub fn message(&self) -> &str {
        match self {
            DatabaseError::NotFound(message)
            | DatabaseError::PreconditionFailed(message)
            | DatabaseError::Conflict(message)
            | DatabaseError::BadRequest(message)
            | DatabaseError::TooManyRequests(message)
            | DatabaseError::ServiceUnavailable(message)
            | DatabaseError::InternalServerError(message)
            | DatabaseError::Cancelled(message) => message,
        }
    }

    pub fn precondition_failed(table: &str, key: &impl fmt::Display) -> Self {
        DatabaseError::PreconditionFailed(format!(
            "conditions are not satisfied for item {key} in table {table}"
        ))
    }

    pub fn already_exists(table: &str, key: &impl fmt::Display) -> Self {
        DatabaseError::Conflict(format!("item {key} already exists in table {table}"))
    }
}

/// A specialized `Result` type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<SerdeJsonError> for DatabaseError {
    fn from(err: SerdeJsonError) -> Self {
        DatabaseError::InternalServerError(format!("conversion failed: {err}"))
    }
}
