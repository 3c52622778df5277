use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do after a retryable stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail,
}

/// Exponential backoff with a fixed attempt ceiling.
///
/// `attempt` is zero-based and is always read from the persisted step row,
/// so the same inputs give the same decision after a worker restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_seconds: 10,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff_seconds: u64) -> Self {
        Self {
            max_retries,
            base_backoff_seconds,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// `base * 2^attempt`, saturating instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(self.base_backoff_seconds.saturating_mul(factor))
    }

    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if self.should_retry(attempt) {
            RetryDecision::Retry {
                delay: self.delay(attempt),
            }
        } else {
            RetryDecision::Fail
        }
    }
}
