//! Engine configuration.

use std::time::Duration;

use chainlog_core::retry::RetryConfig;

/// Configuration for the log-polling engine.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Timeout applied to each chain-client call.
    pub rpc_timeout: Duration,
    /// How far the reorg rollback walk may go before giving up with
    /// `ReorgTooDeep`.
    pub max_reorg_depth: u64,
    /// Max blocks per log-fetch request (chain-client RPC range limits).
    pub backfill_batch_size: u64,
    /// Blocks per storage transaction during persist.
    pub persist_batch_size: u64,
    /// Where an empty store starts syncing; `None` = current head.
    pub start_block: Option<i64>,
    /// Backoff for transient chain-client and storage errors.
    pub retry: RetryConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(10),
            max_reorg_depth: 64,
            backfill_batch_size: 500,
            persist_batch_size: 100,
            start_block: None,
            retry: RetryConfig::default(),
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.max_reorg_depth = depth;
        self
    }

    pub fn backfill_batch_size(mut self, size: u64) -> Self {
        self.backfill_batch_size = size.max(1);
        self
    }

    pub fn persist_batch_size(mut self, size: u64) -> Self {
        self.persist_batch_size = size.max(1);
        self
    }

    pub fn start_block(mut self, block: i64) -> Self {
        self.start_block = Some(block);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PollerConfig::default();
        assert_eq!(cfg.max_reorg_depth, 64);
        assert_eq!(cfg.backfill_batch_size, 500);
        assert!(cfg.start_block.is_none());
    }

    #[test]
    fn fluent_overrides() {
        let cfg = PollerConfig::default()
            .max_reorg_depth(8)
            .backfill_batch_size(0) // clamped to 1
            .start_block(100);
        assert_eq!(cfg.max_reorg_depth, 8);
        assert_eq!(cfg.backfill_batch_size, 1);
        assert_eq!(cfg.start_block, Some(100));
    }
}
