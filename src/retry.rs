//! Retry logic with exponential backoff
//!
//! This module provides cancellable retry logic for transient failures. Each
//! failed attempt is classified through [`IsRetryable`]; permanent failures end
//! the loop immediately without consuming the remaining attempts.
//!
//! # Example
//!
//! ```no_run
//! use paper_harvest::retry::{IsRetryable, retry_with_backoff};
//! use paper_harvest::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let outcome = retry_with_backoff(&config, &cancel, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! assert!(outcome.is_ok());
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::AttemptError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server overload, truncated bodies) should return `true`.
/// Permanent failures (resource gone, access forbidden) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            // Connection, DNS, TLS and per-attempt timeouts
            AttemptError::Transport(_) => true,
            // 403 and 404 mean the document is not available to us at all
            AttemptError::Status { status, .. } => !matches!(status, 403 | 404),
            // Truncated or reset body
            AttemptError::Body(_) => true,
        }
    }
}

/// A successful value together with the number of attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    /// The operation's output
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Why [`retry_with_backoff`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted {
        /// The last observed error
        last: E,
        /// Number of attempts made
        attempts: u32,
    },
    /// An attempt failed with a non-retryable error
    Rejected {
        /// The permanent error
        error: E,
        /// Number of attempts made, including the rejected one
        attempts: u32,
    },
    /// The cancellation token fired during an attempt or a backoff sleep
    Cancelled {
        /// Number of attempts started
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were started
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Rejected { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Delay to wait after failed attempt number `attempt` (1-based)
///
/// `min(initial_delay * multiplier^(attempt-1), max_delay)`. With the default
/// configuration this is `min(2^(attempt-1), 30)` seconds, which is
/// monotonically non-decreasing in `attempt`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);

    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs)
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation receives the 1-based attempt number. At most
/// `config.max_attempts` attempts are made. Returns immediately on the first
/// success or on the first non-retryable error. No delay follows the final
/// attempt.
///
/// Cancellation is checked before every attempt and raced against both the
/// attempt itself and the backoff sleep, so a fired token ends the loop
/// promptly instead of completing the sleep.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryError::Rejected {
                    error: e,
                    attempts: attempt,
                });
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    error = %e,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    last: e,
                    attempts: attempt,
                });
            }
            Err(e) => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
