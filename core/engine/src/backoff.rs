//! Exponential backoff policy for scheduled retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff configuration for retry scheduling.
///
/// The delay before retry `k` is `base_delay * 2^k`, capped at `max_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base unit for the exponential curve.
    pub base_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Create a policy with the given base unit and the default 5 minute cap.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(300),
        }
    }

    /// Set the growth cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to impose before the attempt that follows `retry_count` failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor.min(u32::MAX as u64) as u32)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
