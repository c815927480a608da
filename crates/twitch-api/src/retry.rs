//! Backoff policy for transient Helix failures.

use std::time::Duration;

use rand::random;

use crate::TwitchApiError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Exponential backoff with jitter, bounded by attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failed attempts.
    pub fn should_retry(&self, attempt: u32, error: &TwitchApiError) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Delay before the next attempt, `attempt` being the number of failed
    /// attempts so far (starting at 1).
    ///
    /// A server-provided `Retry-After` wins over the computed backoff but is
    /// still capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &TwitchApiError) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint.min(self.max_delay);
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let shift = attempt.saturating_sub(1).min(16);
        let exp_ms = base_ms.saturating_mul(1u64 << shift);
        let capped_ms = exp_ms.min(max_ms);
        let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);

        Duration::from_millis((capped_ms + jitter_ms).min(max_ms))
    }
}
