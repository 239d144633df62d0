//! Retry logic with exponential backoff and jitter
//!
//! Resources wrap every backend dispatch in a [`RetryExecutor`]:
//! - Exponential backoff between `min_delay` and `max_delay`, with jitter
//! - Only `TryAgain`, `RateLimit` and `Timeout` errors are retried
//! - `max_retries` extra attempts after the first (0 = no retry)
//! - Optional overall deadline, independent of per-request network timeouts

use crate::error::{ErnieError, ErnieResult};
use crate::logging::{log_debug, log_error};

use std::time::{Duration, Instant};

/// Retry policy configuration for provider requests
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    /// Delay before the first retry
    pub min_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0.1 = up to 10%)
    pub jitter: f64,
    /// Maximum total operation time across all attempts
    pub total_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            total_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` retries and default delays.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Determine if an error should trigger a retry
    pub fn should_retry(&self, error: &ErnieError) -> bool {
        match error {
            ErnieError::TryAgain(_) => true,
            ErnieError::RateLimit(_) => true,
            ErnieError::Timeout { .. } => true,
            // Quota exhaustion, bad input and auth problems won't heal on their own
            _ => false,
        }
    }

    /// Delay before retry number `attempt` (1-based), jitter included.
    ///
    /// The result never exceeds `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.min_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64()).max(0.0);

        // Add jitter to prevent thundering herd
        let jitter = fastrand::f64() * self.jitter.max(0.0);
        let delay = (capped * (1.0 + jitter)).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Retry executor that handles exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    pub(crate) policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an async operation with retry logic
    pub async fn execute<F, Fut, T>(&self, operation: F) -> ErnieResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ErnieResult<T>>,
    {
        let start_time = tokio::time::Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.log_attempt(attempt);

            let error = match operation().await {
                Ok(response) => {
                    log_debug!(
                        attempt = attempt,
                        duration_ms = start_time.elapsed().as_millis(),
                        "Request succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            let delay = self.plan_retry(&error, attempt, start_time.elapsed())?;
            let Some(delay) = delay else {
                return self.handle_exhausted_retries(attempt, error, start_time.elapsed());
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Execute a blocking operation with retry logic
    pub fn execute_blocking<F, T>(&self, operation: F) -> ErnieResult<T>
    where
        F: Fn() -> ErnieResult<T>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.log_attempt(attempt);

            let error = match operation() {
                Ok(response) => {
                    log_debug!(
                        attempt = attempt,
                        duration_ms = start_time.elapsed().as_millis(),
                        "Request succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            let delay = self.plan_retry(&error, attempt, start_time.elapsed())?;
            let Some(delay) = delay else {
                return self.handle_exhausted_retries(attempt, error, start_time.elapsed());
            };
            std::thread::sleep(delay);
        }
    }

    /// Decide what happens after a failed attempt.
    ///
    /// `Ok(Some(delay))` means retry after `delay`; `Ok(None)` means give up
    /// with the attempt's error; `Err` means the overall deadline expired.
    fn plan_retry(
        &self,
        error: &ErnieError,
        attempt: u32,
        elapsed: Duration,
    ) -> ErnieResult<Option<Duration>> {
        if !self.policy.should_retry(error) || attempt > self.policy.max_retries {
            return Ok(None);
        }

        let delay = self.policy.next_delay(attempt);
        if let Some(total_timeout) = self.policy.total_timeout {
            if elapsed + delay >= total_timeout {
                return Err(ErnieError::timeout(format!(
                    "Retry budget of {:.1}s exhausted after {attempt} attempts: {error}",
                    total_timeout.as_secs_f64()
                )));
            }
        }

        log_debug!(
            attempt = attempt,
            max_retries = self.policy.max_retries,
            delay_ms = delay.as_millis(),
            error = %error,
            "Request failed, retrying after delay"
        );
        Ok(Some(delay))
    }

    fn log_attempt(&self, attempt: u32) {
        log_debug!(
            attempt = attempt,
            max_retries = self.policy.max_retries,
            "Executing request with retry logic"
        );
    }

    fn handle_exhausted_retries<T>(
        &self,
        attempt: u32,
        final_error: ErnieError,
        elapsed: Duration,
    ) -> ErnieResult<T> {
        if attempt > 1 {
            log_error!(
                attempts = attempt,
                total_duration_ms = elapsed.as_millis(),
                error = %final_error,
                "Request failed after all retry attempts"
            );
        }
        Err(final_error)
    }
}
