//! Bounded retry with exponential backoff and jitter.
//!
//! Every tile visit and every tileset load in a traversal runs through
//! [`retry`]. The backoff sleep races the caller's cancellation token, so
//! cancelling a build never waits out a pending delay.

use crate::config::{
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY_MS,
};
use crate::error::{IndexerError, Result};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Cap on the exponential delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base and maximum backoff delays in milliseconds.
    pub fn with_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.base_delay_ms = base;
        self.max_delay_ms = max;
        self
    }

    /// Backoff before attempt `attempt + 1` (attempts are 1-based).
    ///
    /// `min(base * 2^(attempt-1), max)` plus up to a quarter of that as
    /// random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64.wrapping_shl(attempt.saturating_sub(1).min(32)));
        let capped = exp.min(self.max_delay_ms);
        let jitter = rand::random::<u64>() % (capped / 4 + 1);
        Duration::from_millis(capped + jitter)
    }
}

/// Runs `operation` until it succeeds or the policy's budget is spent.
///
/// # Errors
///
/// - `IndexerError::Cancelled` if `token` fires before or between attempts
/// - the operation's own error, unchanged, if it is not retryable
/// - `IndexerError::RetryExhausted` wrapping the last error otherwise
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if token.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            return Err(IndexerError::RetryExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(IndexerError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
