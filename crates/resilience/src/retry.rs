//! Bounded retries with linear backoff.
//!
//! After the n-th failed attempt the caller sleeps `backoff_unit * n`
//! (capped at `max_delay`) before trying again. Errors that report
//! themselves as non-retryable stop the loop at once.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt. Total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Backoff grows by this much per failed attempt.
    #[serde(with = "crate::serde_millis")]
    pub backoff_unit: Duration,
    /// Upper bound on a single backoff sleep.
    #[serde(with = "crate::serde_millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sleep taken after `failed_attempts` consecutive failures.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(failed_attempts)
            .min(self.max_delay)
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Result of a retry operation.
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    /// The final result: the first success, or the last error.
    pub result: Result<T, E>,
    /// Number of attempts made (1 = no retries needed).
    pub attempts: u32,
    /// Total duration spent on all attempts, including backoff.
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Execute an async operation with retry logic.
///
/// `operation` receives the 1-based attempt number.
///
/// ```ignore
/// let outcome = execute_with_retry_async(&RetryConfig::default(), |attempt| async move {
///     client.call(attempt).await
/// })
/// .await;
/// ```
pub async fn execute_with_retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt,
                    total_duration: start.elapsed(),
                };
            }
            Err(error) if error.is_retryable() && attempt <= config.max_retries => {
                let delay = config.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                if error.is_retryable() {
                    tracing::error!(attempts = attempt, error = %error, "retries exhausted");
                } else {
                    tracing::debug!(attempts = attempt, error = %error, "non-retryable failure");
                }
                return RetryResult {
                    result: Err(error),
                    attempts: attempt,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}
