//! Retry-on-contention for read-modify-write operations.
//!
//! An operation is driven through an explicit state machine:
//!
//! ```text
//! Attempt(n) --ok--------------------------------> Success
//! Attempt(n) --failed----------------------------> Failure (surfaced as is)
//! Attempt(n) --contention, n < max--> Backoff(n) --delay--> Attempt(n + 1)
//! Attempt(n) --contention, n = max--> Exhausted --------> TooManyRequests
//! ```
//!
//! The whole attempt (begin, lookup, evaluate, mutate, commit) is re-run on contention.

use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

use crate::error::{DatabaseError, DatabaseResult};

/// How often and how patiently contended operations are retried.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// The backend signaled a lost race; the attempt may be re-run.
    Contention(String),
    /// Terminal failure, surfaced without retrying.
    Failed(DatabaseError),
}

impl From<DatabaseError> for AttemptError {
    fn from(error: DatabaseError) -> Self {
        AttemptError::Failed(error)
    }
}

enum RetryState {
    Attempt(u32),
    Backoff { attempt: u32, reason: String },
    Exhausted { reason: String },
}

/// Runs `attempt` until it succeeds, fails terminally or exhausts `policy`.
///
/// The closure receives the 1-based attempt number.
pub async fn retry_on_contention<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> DatabaseResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut state = RetryState::Attempt(1);

    loop {
        state = match state {
            RetryState::Attempt(n) => match attempt(n).await {
                Ok(value) => {
                    if n > 1 {
                        debug!(operation, attempt = n, "succeeded after contention");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Failed(error)) => return Err(error),
                Err(AttemptError::Contention(reason)) if n >= max_attempts => {
                    RetryState::Exhausted { reason }
                }
                Err(AttemptError::Contention(reason)) => RetryState::Backoff { attempt: n, reason },
            },
            RetryState::Backoff { attempt: n, reason } => {
                warn!(
                    operation,
                    attempt = n,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    %reason,
                    "contention detected, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                RetryState::Attempt(n + 1)
            }
            RetryState::Exhausted { reason } => {
                warn!(operation, max_attempts, %reason, "contention retries exhausted");
                return Err(DatabaseError::TooManyRequests(format!(
                    "{operation} did not complete after {max_attempts} attempts: {reason}"
                )));
            }
        };
    }
}
