//! Retry rules for outbound ARM calls
//!
//! Transient failures (throttling, gateway errors, timeouts) are retried
//! with exponential backoff. Everything else surfaces on the first attempt.

use super::error::{ApiError, ErrorClass};
use crate::config::Config;
use crate::plugin::Cancellation;
use std::future::Future;
use std::time::Duration;

/// HTTP statuses treated as transient unless configured otherwise
pub const DEFAULT_RETRY_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

pub const DEFAULT_MAX_RETRIES: u32 = 9;
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(25);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

/// Build the retry policy for a connection
pub fn apply_retry_rules(config: &Config) -> RetryPolicy {
    let mut policy = RetryPolicy::default();

    if let Some(attempts) = config.max_error_retry_attempts {
        policy.max_retries = attempts;
    }
    if let Some(delay_ms) = config.min_error_retry_delay {
        policy.min_delay = Duration::from_millis(delay_ms);
    }

    tracing::debug!(
        "Retry rules: max_retries={}, min_delay={:?}",
        policy.max_retries,
        policy.min_delay
    );

    policy
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32, retry_after: Option<u64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs(secs).min(self.max_delay);
        }

        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn is_transient(&self, err: &ApiError) -> bool {
        err.classify(&self.retry_statuses) == ErrorClass::Transient
    }

    /// Run `call` until it succeeds, fails non-transiently, or the retry
    /// bound is spent. Backoff sleeps end early on cancellation.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        cancel: &Cancellation,
        mut call: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut retries = 0;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_transient(&err) {
                return Err(err);
            }

            if retries >= self.max_retries {
                tracing::warn!(
                    "{}: giving up after {} retries: {}",
                    operation,
                    retries,
                    err
                );
                return Err(err);
            }

            retries += 1;
            let delay = self.delay_for(retries, err.retry_after());
            tracing::warn!(
                "{}: transient error, retry {}/{} in {:?}: {}",
                operation,
                retries,
                self.max_retries,
                delay,
                err
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            }
        }
    }
}
