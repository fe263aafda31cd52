//! Retry policy for webhook delivery.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Always wait the base delay.
    #[default]
    Fixed,
    /// Double the base delay after every failure, capped at `max_delay_ms`.
    Exponential { max_delay_ms: u64 },
}

/// Bounded retry policy: one initial attempt plus `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Growth of the delay.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a fixed delay policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Sets the backoff.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total attempts per job.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the wait after failed attempt `attempt_number` (1-based), or
    /// `None` when that was the last attempt.
    pub fn delay_after(&self, attempt_number: u32) -> Option<Duration> {
        if attempt_number >= self.max_attempts() {
            return None;
        }

        match self.backoff {
            Backoff::Fixed => Some(self.delay),
            Backoff::Exponential { max_delay_ms } => {
                let exponent = attempt_number.saturating_sub(1).min(31);
                let delay = self.delay.saturating_mul(1u32 << exponent);
                Some(delay.min(Duration::from_millis(max_delay_ms)))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(60))
    }
}
