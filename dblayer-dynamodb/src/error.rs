//! Mapping of SDK failures onto the database error taxonomy.

use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use std::fmt::Debug;

use dblayer_core::{error::DatabaseError, retry::AttemptError};

/// Error codes the service uses to signal contention or throttling.
const CONTENTION_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TransactionConflictException",
];

pub(crate) fn map_error_code(code: &str, message: String) -> DatabaseError {
    match code {
        "ConditionalCheckFailedException" => DatabaseError::PreconditionFailed(message),
        code if CONTENTION_CODES.contains(&code) => DatabaseError::TooManyRequests(message),
        "ResourceNotFoundException" => DatabaseError::NotFound(message),
        "ResourceInUseException" => DatabaseError::Conflict(message),
        "ValidationException" | "SerializationException" => DatabaseError::BadRequest(message),
        "UnrecognizedClientException" | "InvalidSignatureException" | "ServiceUnavailable" => {
            DatabaseError::ServiceUnavailable(message)
        }
        _ => DatabaseError::InternalServerError(message),
    }
}

/// Maps an SDK error. Conditional check failures come back as `PreconditionFailed` and
/// contention as `TooManyRequests`; callers refine both.
pub fn map_sdk_error<E, R>(error: SdkError<E, R>) -> DatabaseError
where
    E: ProvideErrorMetadata + Debug,
    R: Debug,
{
    let fallback = format!("{error:?}");

    match error {
        SdkError::ServiceError(service_error) => {
            let code = service_error.err().code().unwrap_or("Unknown").to_string();
            let message = service_error
                .err()
                .message()
                .map(|message| format!("{code}: {message}"))
                .unwrap_or(fallback);
            map_error_code(&code, message)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            DatabaseError::ServiceUnavailable(fallback)
        }
        _ => DatabaseError::InternalServerError(fallback),
    }
}

/// Splits mapped errors into retryable contention and terminal failures.
pub fn classify(error: DatabaseError) -> AttemptError {
    match error {
        DatabaseError::TooManyRequests(message) => AttemptError::Contention(message),
        other => AttemptError::Failed(other),
    }
}

pub(crate) fn build_error(error: aws_sdk_dynamodb::error::BuildError) -> DatabaseError {
    DatabaseError::InternalServerError(format!("invalid request: {error}"))
}
