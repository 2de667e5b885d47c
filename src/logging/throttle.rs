//! Rate-limited logging.
//!
//! `LogThrottle` keeps a warning that fires every cycle (stale feeds, an open
//! breaker) from flooding the log, while counting what it swallowed.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct LogThrottle {
    last_log_time: Option<Instant>,
    suppressed_count: u64,
    interval: Duration,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log_time: None,
            suppressed_count: 0,
            interval,
        }
    }

    /// `true` when at least `interval` has passed since the last emitted
    /// message. Otherwise the message counts as suppressed.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_log_time {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed_count += 1;
                false
            }
            _ => {
                self.last_log_time = Some(now);
                true
            }
        }
    }

    /// Suppressed messages since the last emitted one. Resets the counter.
    pub fn get_and_reset_suppressed_count(&mut self) -> u64 {
        std::mem::take(&mut self.suppressed_count)
    }

    /// Forget the last emission so the next condition logs immediately.
    pub fn reset(&mut self) {
        self.last_log_time = None;
        self.suppressed_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttles_within_interval() {
        tokio::time::pause();
        let mut throttle = LogThrottle::new(Duration::from_secs(5));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
        assert!(!throttle.should_log());
        assert_eq!(throttle.get_and_reset_suppressed_count(), 2);
        assert_eq!(throttle.get_and_reset_suppressed_count(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(throttle.should_log());
    }

    #[tokio::test]
    async fn test_reset_logs_next_immediately() {
        tokio::time::pause();
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_log());
        throttle.reset();
        assert!(throttle.should_log());
    }
}
