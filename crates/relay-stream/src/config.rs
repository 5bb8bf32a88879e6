//! Relay configuration.

use std::time::Duration;

/// Configuration for a [`StreamRelay`](crate::StreamRelay).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Chunks arriving within this window are merged into one update.
    pub window: Duration,
    /// A batch at least this large is flushed without waiting for the window.
    pub max_batch_bytes: usize,
    /// Out-of-order chunks held while waiting for a gap to fill.
    pub reorder_limit: usize,
    /// Retries after a rate-limit response.
    pub max_retries: u32,
    /// Growth factor applied to the transport's retry-after delay per attempt.
    pub backoff_multiplier: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            max_batch_bytes: 3000,
            reorder_limit: 64,
            max_retries: 3,
            backoff_multiplier: 1.5,
        }
    }
}

impl StreamConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the coalescing window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the size threshold for immediate flushes.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets how many out-of-order chunks may be buffered.
    pub fn with_reorder_limit(mut self, limit: usize) -> Self {
        self.reorder_limit = limit;
        self
    }

    /// Sets the number of rate-limit retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();

        assert_eq!(config.window, Duration::from_secs(1));
        assert_eq!(config.max_batch_bytes, 3000);
        assert_eq!(config.reorder_limit, 64);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_multiplier, 1.5);
    }

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new()
            .with_window(Duration::from_millis(200))
            .with_max_batch_bytes(10)
            .with_reorder_limit(4)
            .with_max_retries(1);

        assert_eq!(config.window, Duration::from_millis(200));
        assert_eq!(config.max_batch_bytes, 10);
        assert_eq!(config.reorder_limit, 4);
        assert_eq!(config.max_retries, 1);
    }
}
