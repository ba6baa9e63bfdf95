//! Bounded attempts with cancellation and an optional deadline.
//!
//! A retry resends the same conversation; attempts differ only by the
//! service's own sampling. Attempts run strictly one after another.

use super::agent::{NarratorError, Operation};
use super::payload::PayloadError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a single attempt failed. Every variant is retried.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Client(#[from] deepinfra::Error),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Run `attempt` up to `max_attempts` times, stopping at the first success.
///
/// Caller errors reported by the client fail immediately without using up
/// an attempt. The attempt number passed to the closure starts at 1.
pub(crate) async fn run<T, F, Fut>(
    operation: Operation,
    max_attempts: u32,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, NarratorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut last_error = None;

    for number in 1..=max_attempts {
        if cancel.is_cancelled() {
            tracing::info!(%operation, attempt = number, "Operation cancelled");
            return Err(NarratorError::Cancelled { operation });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(%operation, attempt = number, "Operation cancelled");
                return Err(NarratorError::Cancelled { operation });
            }
            outcome = attempt(number) => outcome,
        };

        match outcome {
            Ok(value) => {
                if number > 1 {
                    tracing::info!(%operation, attempt = number, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(AttemptError::Client(e)) if e.is_caller_error() => {
                tracing::error!(%operation, error = %e, "Request rejected before sending");
                return Err(NarratorError::InvalidRequest(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(
                    %operation,
                    attempt = number,
                    max_attempts,
                    error = %e,
                    "Attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(source) => {
            tracing::error!(
                %operation,
                attempts = max_attempts,
                error = %source,
                "Reached maximum attempts"
            );
            Err(NarratorError::Exhausted {
                operation,
                attempts: max_attempts,
                source,
            })
        }
        None => Err(NarratorError::InvalidRequest(
            "max_attempts must be at least 1".to_string(),
        )),
    }
}

/// Bound a whole operation by `deadline`, if one is set.
pub(crate) async fn within<T, Fut>(
    operation: Operation,
    deadline: Option<Duration>,
    future: Fut,
) -> Result<T, NarratorError>
where
    Fut: Future<Output = Result<T, NarratorError>>,
{
    let Some(after) = deadline else {
        return future.await;
    };

    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(%operation, after_ms = after.as_millis() as u64, "Operation timed out");
            Err(NarratorError::TimedOut { operation, after })
        }
    }
}
