// Retry with exponential backoff for transport failures.
// Reverts and RPC-level rejections are returned immediately.
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::ChainResult;

/// Backoff parameters for transport retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum retry delay in milliseconds (backoff cap)
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_base(max_retries: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            ..Default::default()
        }
    }

    /// Run `operation`, retrying transient errors with backoff
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> ChainResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        let mut attempt = 0;
        let mut delay_ms = self.initial_delay_ms;

        loop {
            attempt += 1;
            debug!("Executing '{}' attempt {}/{}", operation_name, attempt, self.max_retries + 1);

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt <= self.max_retries => {
                    let final_delay = (delay_ms + self.calculate_jitter(delay_ms)).min(self.max_delay_ms);
                    warn!(
                        "'{}' failed (attempt {}/{}): {}; retrying in {}ms",
                        operation_name,
                        attempt,
                        self.max_retries + 1,
                        err,
                        final_delay
                    );
                    sleep(Duration::from_millis(final_delay)).await;
                    delay_ms = (delay_ms as f64 * self.backoff_multiplier) as u64;
                }
                Err(err) => {
                    if err.is_transient() {
                        error!("'{}' failed after {} attempts: {}", operation_name, attempt, err);
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Random jitter in `0..=base_delay_ms * jitter_factor`
    pub fn calculate_jitter(&self, base_delay_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return 0;
        }

        let max_jitter = (base_delay_ms as f64 * self.jitter_factor) as u64;
        fastrand::u64(0..=max_jitter)
    }
}
