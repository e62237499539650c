//! # Exponential Backoff
//!
//! Doubling backoff used in two places:
//!
//! - the error policy, which requeues a TaskRun whose reconciliation returned
//!   an error (`BACKOFF_START_MS` doubling up to `BACKOFF_MAX_MS`)
//! - the quota backoff in [`TimeoutSet`](super::timeout::TimeoutSet), which
//!   spaces out pod creation retries after `exceeded quota` rejections
//!
//! ## Usage
//!
//! ```rust
//! use taskrun_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! ```

use std::time::Duration;

/// `base * 2^exponent`, capped at `max`
#[must_use]
pub fn exponential_delay(base: Duration, exponent: u32, max: Duration) -> Duration {
    let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |delay| delay.min(max))
}

/// Exponential backoff calculator
///
/// Each call to [`next_backoff`](Self::next_backoff) returns the current delay
/// and doubles it for the next call, never exceeding `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start: Duration,
    max: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start,
            max,
            attempts: 0,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = exponential_delay(self.start, self.attempts, self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Number of delays handed out since creation or the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
