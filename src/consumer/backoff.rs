//! Adaptive poll delay for an idle stream.

use std::time::Duration;

/// Smallest idle delay; a zero delay would never grow.
pub const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

/// Doubling delay between empty fetches, bounded by `[min, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl PollBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_POLL_DELAY);
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Bounds given in whole seconds, as configured.
    pub fn from_secs(min_secs: u64, max_secs: u64) -> Self {
        Self::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs))
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to sleep now and double the next one, up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = delay.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to `min` after a non-empty fetch.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_on_consecutive_empty_fetches() {
        let mut backoff = PollBackoff::from_secs(1, 8);
        let delays: Vec<u128> = (0..3).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000]);
    }

    #[test]
    fn caps_at_max() {
        let mut backoff = PollBackoff::from_secs(1, 8);
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn reset_returns_to_min() {
        let mut backoff = PollBackoff::from_secs(1, 8);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn max_below_min_is_raised() {
        let mut backoff = PollBackoff::from_secs(4, 1);
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn zero_min_still_grows() {
        let mut backoff = PollBackoff::from_secs(0, 8);
        let delays: Vec<u128> = (0..3).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1, 2, 4]);
    }

    #[test]
    fn zero_bounds_are_raised_to_floor() {
        let mut backoff = PollBackoff::from_secs(0, 0);
        assert_eq!(backoff.next_delay(), MIN_POLL_DELAY);
        assert_eq!(backoff.next_delay(), MIN_POLL_DELAY);
    }
}
