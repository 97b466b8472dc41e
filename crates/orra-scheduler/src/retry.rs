//! Retry/backoff policy.
//!
//! Shared between dispatch and the compensation engine, which reuses the
//! same policy rather than duplicating it.

use std::time::Duration;

/// Base 1s, factor 2, cap 30s, max 10 attempts, full jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn dispatch_default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }

    /// Whether another attempt is permitted after `attempts_so_far` failures.
    #[must_use]
    pub fn should_retry(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Full-jitter backoff delay before attempt number `attempt` (1-indexed):
    /// a uniform random duration in `[0, min(cap, base * factor^(attempt-1))]`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let unjittered = self.base.as_secs_f64() * self.factor.powi(exponent);
        let capped = unjittered.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped * fastrand::f64())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::dispatch_default()
    }
}
