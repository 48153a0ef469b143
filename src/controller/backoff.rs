//! # Exponential Backoff
//!
//! Per-key retry delay for failed reconciliations: `base * 2^failures`, capped at
//! `max`. Sequence with the defaults (5ms base, 1000s cap):
//! 5ms, 10ms, 20ms, 40ms, ... 1000s.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use volume_events_exporter::controller::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
//! ```

use std::time::Duration;

/// Largest exponent applied before the cap takes over; keeps the shift in range
const MAX_EXPONENT: u32 = 31;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Get the next delay and count one more failure
    pub fn next_backoff(&mut self) -> Duration {
        let exponent = self.failures.min(MAX_EXPONENT);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max));
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Failures counted since the last reset
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
