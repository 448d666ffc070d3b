//! # Limited Backoff
//!
//! Provides a fixed-interval backoff with a hard ceiling on the number of retries.
//!
//! Transient Conjur unavailability is retried on a constant, predictable cadence
//! instead of a growing one. Once the limit is reached the backoff reports that
//! retrying should stop.
//!
//! ## Usage
//!
//! ```rust
//! use secrets_provider::controller::backoff::LimitedBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = LimitedBackoff::new(Duration::from_secs(1), 2);
//! assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
//! assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
//! assert_eq!(backoff.next_backoff(), None);
//! ```

use std::time::Duration;

/// Fixed-interval backoff calculator
///
/// Returns the same interval for the first `retry_limit` calls to
/// [`LimitedBackoff::next_backoff`] and `None` afterwards.
#[derive(Debug, Clone)]
pub struct LimitedBackoff {
    /// Delay returned for every permitted retry
    interval: Duration,
    /// Number of retries permitted before stopping
    retry_limit: u32,
    /// Retries handed out since the last reset
    retry_count: u32,
}

impl LimitedBackoff {
    /// Create a new limited backoff
    ///
    /// # Arguments
    ///
    /// * `interval` - Delay between attempts
    /// * `retry_limit` - Number of retries allowed (0 disables retrying)
    #[must_use]
    pub fn new(interval: Duration, retry_limit: u32) -> Self {
        Self {
            interval,
            retry_limit,
            retry_count: 0,
        }
    }

    /// Get the next backoff duration and advance the counter
    ///
    /// Returns `None` once `retry_limit` retries have been handed out.
    ///
    /// # Example
    ///
    /// ```
    /// use secrets_provider::controller::backoff::LimitedBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = LimitedBackoff::new(Duration::from_millis(10), 1);
    /// assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(10)));
    /// assert_eq!(backoff.next_backoff(), None);
    /// ```
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retry_count >= self.retry_limit {
            return None;
        }
        self.retry_count += 1;
        Some(self.interval)
    }

    /// Reset the counter so the full retry budget is available again
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Number of retries handed out since the last reset
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limited_backoff_stops_at_limit() {
        let mut backoff = LimitedBackoff::new(Duration::from_secs(2), 3);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        // Limit reached, stays stopped
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.retry_count(), 3);
    }

    #[test]
    fn test_limited_backoff_reset() {
        let mut backoff = LimitedBackoff::new(Duration::from_secs(1), 2);

        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_none());

        backoff.reset();

        assert_eq!(backoff.retry_count(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.retry_count(), 1);
    }

    #[test]
    fn test_limited_backoff_zero_limit() {
        let mut backoff = LimitedBackoff::new(Duration::from_secs(1), 0);
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.retry_count(), 0);
    }

    #[test]
    fn test_limited_backoff_instances_are_independent() {
        let mut first = LimitedBackoff::new(Duration::from_secs(1), 1);
        let mut second = LimitedBackoff::new(Duration::from_secs(1), 1);

        assert!(first.next_backoff().is_some());
        assert!(first.next_backoff().is_none());
        // Second instance still has its full budget
        assert!(second.next_backoff().is_some());
    }
}
