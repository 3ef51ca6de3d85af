//! # Exponential Backoff
//!
//! Provides the delay sequence used between retries of idempotent backend calls.
//! Each delay doubles the previous one and is capped at a maximum.

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates backoff durations that double on every step until `max` is reached.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned by the next call
    current: Duration,
    /// Upper bound of any delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `initial` and capped at `max`
    ///
    /// # Arguments
    ///
    /// * `initial` - First delay
    /// * `max` - Maximum delay
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { current: initial, max }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1000));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(800));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000)); // max
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
    }
}
