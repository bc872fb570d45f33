//! Configuration for the write pipeline.

use rand::Rng;
use std::time::Duration;

/// Retry and backoff settings for bulk writes.
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Failed attempts allowed before a write fails. Rejected attempts are
    /// allowed twice as often.
    pub max_retries: u32,
    /// Base backoff pause.
    pub pause: Duration,
    /// Upper bound on one backoff pause.
    pub max_pause: Duration,
    /// Whether to add up to 1% random jitter to pauses.
    pub jitter: bool,
}

impl WriteConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            max_retries: 10,
            pause: Duration::from_millis(100),
            max_pause: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Sets the number of failed attempts allowed.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base pause.
    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Sets the maximum pause.
    #[must_use]
    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Failed attempts after which a write fails.
    pub fn max_failed_attempts(&self) -> u32 {
        self.max_retries
    }

    /// Rejected attempts after which a write fails for lack of capacity.
    pub fn max_rejected_attempts(&self) -> u32 {
        self.max_retries.saturating_mul(2)
    }

    /// Backoff before attempt `attempt + 1`, starting from `pause`.
    ///
    /// Grows as `pause * 2^(attempt - 1)` up to [`max_pause`](Self::max_pause).
    pub fn wait_time(&self, attempt: u32, pause: Duration) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        let wait = pause
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_pause)
            .min(self.max_pause);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.0..=0.01);
            wait + wait.mul_f64(factor)
        } else {
            wait
        }
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_config() {
        let config = WriteConfig::default();
        assert_eq!(config.max_failed_attempts(), 10);
        assert_eq!(config.max_rejected_attempts(), 20);
        assert_eq!(config.pause, Duration::from_millis(100));
        assert!(config.jitter);
    }

    #[test]
    fn wait_time_doubles_until_capped() {
        let config = WriteConfig::new()
            .with_jitter(false)
            .with_max_pause(Duration::from_millis(500));
        let pause = Duration::from_millis(100);
        assert_eq!(config.wait_time(0, pause), Duration::ZERO);
        assert_eq!(config.wait_time(1, pause), Duration::from_millis(100));
        assert_eq!(config.wait_time(2, pause), Duration::from_millis(200));
        assert_eq!(config.wait_time(3, pause), Duration::from_millis(400));
        assert_eq!(config.wait_time(4, pause), Duration::from_millis(500));
        assert_eq!(config.wait_time(200, pause), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_one_percent() {
        let config = WriteConfig::new();
        for attempt in 1..8 {
            let base = Duration::from_millis(100) * (1 << (attempt - 1));
            let wait = config.wait_time(attempt, Duration::from_millis(100));
            assert!(wait >= base);
            assert!(wait <= base + base / 100 + Duration::from_nanos(1));
        }
    }

    proptest! {
        #[test]
        fn wait_time_is_monotonic_and_capped(
            attempt in 1u32..500,
            pause_ms in 1u64..10_000,
            max_ms in 1u64..60_000,
        ) {
            let config = WriteConfig::new()
                .with_jitter(false)
                .with_max_pause(Duration::from_millis(max_ms));
            let pause = Duration::from_millis(pause_ms);
            let wait = config.wait_time(attempt, pause);
            prop_assert!(wait <= Duration::from_millis(max_ms));
            prop_assert!(wait <= config.wait_time(attempt + 1, pause));
        }
    }
}
