//! Bounded exponential backoff for upstream calls.

use crate::config::RetryPolicy;
use crate::error::UpstreamError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// Whether the failure is transient.
    fn is_retryable(&self) -> bool;

    /// Delay requested by the server, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        UpstreamError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        UpstreamError::retry_after(self)
    }
}

/// Result of an operation run under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Retried<T, E> {
    /// Final outcome after the last attempt
    pub result: Result<T, E>,

    /// Number of retries performed (0 if the first attempt settled it)
    pub retries: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted.
///
/// `op` receives the 0-indexed attempt number. Between attempts the task
/// sleeps for the server's `Retry-After` (clamped) or the policy's
/// exponential delay.
///
/// # Example
///
/// ```
/// use rag_eval_core::{retry_with_backoff, RetryPolicy, UpstreamError};
///
/// # async fn example() {
/// let policy = RetryPolicy::new().with_base_delay_ms(1);
/// let outcome = retry_with_backoff(&policy, "lookup", |attempt| async move {
///     if attempt == 0 {
///         Err(UpstreamError::Timeout(10))
///     } else {
///         Ok(attempt)
///     }
/// })
/// .await;
/// assert_eq!(outcome.retries, 1);
/// # }
/// ```
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Retried<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    retries: attempt,
                }
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = e
                    .retry_after()
                    .map(|d| policy.clamp(d))
                    .unwrap_or_else(|| policy.delay(attempt));
                log::warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}...",
                    label,
                    attempt + 1,
                    policy.max_attempts(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Retried {
                    result: Err(e),
                    retries: attempt,
                }
            }
        }
    }
}
