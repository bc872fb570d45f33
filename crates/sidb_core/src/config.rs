//! Transaction store configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Configuration for the transaction store.
#[derive(Debug, Clone)]
pub struct TxnConfig {
    /// Keep-alive gap after which an active transaction counts as rolled back.
    pub keep_alive_timeout: Duration,

    /// How often owners are expected to heartbeat.
    pub keep_alive_interval: Duration,

    /// Number of transaction-table buckets (power of two, at most 256).
    pub bucket_count: u16,

    /// Capacity of the completed-transaction cache.
    pub completed_txn_cache_size: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(150),
            keep_alive_interval: Duration::from_secs(15),
            bucket_count: 16,
            completed_txn_cache_size: 1024,
        }
    }
}

impl TxnConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the keep-alive timeout.
    #[must_use]
    pub const fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub const fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the bucket count.
    #[must_use]
    pub const fn bucket_count(mut self, count: u16) -> Self {
        self.bucket_count = count;
        self
    }

    /// Sets the completed-transaction cache size.
    #[must_use]
    pub const fn completed_txn_cache_size(mut self, size: usize) -> Self {
        self.completed_txn_cache_size = size;
        self
    }

    /// Keep-alive timeout in milliseconds.
    #[must_use]
    pub fn timeout_millis(&self) -> u64 {
        u64::try_from(self.keep_alive_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket count is not a power of two in `1..=256`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.bucket_count == 0 || self.bucket_count > 256 || !self.bucket_count.is_power_of_two() {
            return Err(CoreError::invalid_operation(format!(
                "bucket count must be a power of two in 1..=256, got {}",
                self.bucket_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TxnConfig::default();
        assert_eq!(config.keep_alive_timeout, Duration::from_secs(150));
        assert_eq!(config.bucket_count, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = TxnConfig::new()
            .keep_alive_timeout(Duration::from_millis(500))
            .bucket_count(4)
            .completed_txn_cache_size(8);

        assert_eq!(config.timeout_millis(), 500);
        assert_eq!(config.bucket_count, 4);
        assert_eq!(config.completed_txn_cache_size, 8);
    }

    #[test]
    fn rejects_bad_bucket_counts() {
        for count in [0, 3, 512] {
            assert!(TxnConfig::new().bucket_count(count).validate().is_err());
        }
        assert!(TxnConfig::new().bucket_count(256).validate().is_ok());
    }
}
