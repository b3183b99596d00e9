//! Retry delays for jobs and for individual sends.

use std::time::Duration;

use crate::job::Backoff;

/// Hard ceiling on any job retry delay.
pub const MAX_JOB_BACKOFF: Duration = Duration::from_secs(30);

/// Job retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: MAX_JOB_BACKOFF,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential configuration with the given base delay.
    #[must_use]
    pub fn with_base(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Override the maximum delay. It never exceeds [`MAX_JOB_BACKOFF`].
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.min(MAX_JOB_BACKOFF);
        self
    }

    /// Calculate the delay after the given failed attempt (1-indexed).
    ///
    /// Pure: the same attempt always yields the same delay.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32, backoff: Backoff) -> Duration {
        let cap = self.max_delay.min(MAX_JOB_BACKOFF);
        let delay = match backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
                if secs.is_finite() && secs < cap.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    cap
                }
            }
        };

        delay.min(cap)
    }
}

/// Per-recipient retry policy for rate-limit and server errors.
#[derive(Debug, Clone)]
pub struct SendRetryPolicy {
    /// Total attempts per recipient, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the wait after every retry.
    pub multiplier: u32,
    /// Upper bound on a server-requested `Retry-After`.
    pub max_retry_after: Duration,
}

impl Default for SendRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_retry_after: Duration::from_secs(30),
        }
    }
}

impl SendRetryPolicy {
    /// Wait before the attempt following `attempt` (1-indexed).
    ///
    /// A `Retry-After` hint can lengthen the wait, never shorten it.
    #[must_use]
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_delay.saturating_mul(factor);

        match retry_after {
            Some(hint) => delay.max(hint.min(self.max_retry_after)),
            None => delay,
        }
    }

    /// Check if another attempt may follow the given one.
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
