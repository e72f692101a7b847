//! In-memory log store.
//!
//! Holds synced blocks and matched logs in RAM behind one mutex, so every
//! write is trivially atomic with respect to readers. Useful for tests and
//! short-lived engines that don't need persistence.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use chainlog_core::error::PollerError;
use chainlog_core::store::{effective_end, LogStore};
use chainlog_core::types::{Address, BlockRecord, Hash, LogRecord};

/// In-memory [`LogStore`]. All data is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Synced blocks keyed by height.
    blocks: BTreeMap<i64, BlockRecord>,
    /// Matched logs, kept sorted by `(block_number, log_index)`.
    logs: Vec<LogRecord>,
}

impl Inner {
    fn latest_number(&self) -> Option<i64> {
        self.blocks.keys().next_back().copied()
    }

    /// Logs for `address` with a signature in `sigs`, within
    /// `[start, end]`, in `(block_number, log_index)` order.
    fn select(&self, start: i64, end: i64, sigs: &[Hash], address: &Address) -> Vec<LogRecord> {
        self.logs
            .iter()
            .filter(|l| {
                l.block_number >= start
                    && l.block_number <= end
                    && l.address == *address
                    && sigs.contains(&l.event_sig)
            })
            .cloned()
            .collect()
    }

    fn sort_logs(&mut self) {
        self.logs
            .sort_by_key(|l| (l.block_number, l.log_index));
    }
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total number of stored logs (diagnostics and tests).
    pub fn log_count(&self) -> usize {
        self.lock().logs.len()
    }

    /// Total number of stored blocks (diagnostics and tests).
    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert_block_range(
        &self,
        blocks: &[BlockRecord],
        logs: &[LogRecord],
    ) -> Result<(), PollerError> {
        let mut inner = self.lock();
        for block in blocks {
            inner.blocks.insert(block.number, block.clone());
        }
        // Upsert on the (block_hash, tx_hash, log_index) identity.
        let incoming: HashSet<(Hash, Hash, i64)> = logs
            .iter()
            .map(|l| (l.block_hash, l.tx_hash, l.log_index))
            .collect();
        inner
            .logs
            .retain(|l| !incoming.contains(&(l.block_hash, l.tx_hash, l.log_index)));
        inner.logs.extend_from_slice(logs);
        inner.sort_logs();
        Ok(())
    }

    async fn delete_from(&self, height: i64) -> Result<(), PollerError> {
        let mut inner = self.lock();
        inner.blocks.retain(|num, _| *num < height);
        inner.logs.retain(|l| l.block_number < height);
        Ok(())
    }

    async fn prune_older_than(&self, cutoff_timestamp: i64) -> Result<u64, PollerError> {
        let mut inner = self.lock();
        let stale: HashSet<i64> = inner
            .blocks
            .values()
            .filter(|b| b.timestamp < cutoff_timestamp)
            .map(|b| b.number)
            .collect();
        inner.blocks.retain(|num, _| !stale.contains(num));
        inner.logs.retain(|l| !stale.contains(&l.block_number));
        Ok(stale.len() as u64)
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, PollerError> {
        let inner = self.lock();
        Ok(inner.blocks.values().next_back().cloned())
    }

    async fn block_by_number(&self, number: i64) -> Result<Option<BlockRecord>, PollerError> {
        Ok(self.lock().blocks.get(&number).cloned())
    }

    async fn blocks_in_range(&self, numbers: &[i64]) -> Result<Vec<BlockRecord>, PollerError> {
        let inner = self.lock();
        let mut out: Vec<BlockRecord> = numbers
            .iter()
            .filter_map(|n| inner.blocks.get(n).cloned())
            .collect();
        out.sort_by_key(|b| b.number);
        out.dedup_by_key(|b| b.number);
        Ok(out)
    }

    async fn logs_by_range(
        &self,
        start: i64,
        end: i64,
        sig: Hash,
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Ok(self.lock().select(start, end, &[sig], &address))
    }

    async fn logs_with_sigs(
        &self,
        start: i64,
        end: i64,
        sigs: &[Hash],
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Ok(self.lock().select(start, end, sigs, &address))
    }

    async fn latest_log_with_confs(
        &self,
        sig: Hash,
        address: Address,
        confirmations: u64,
    ) -> Result<Option<LogRecord>, PollerError> {
        let inner = self.lock();
        let Some(latest) = inner.latest_number() else {
            return Ok(None);
        };
        let end = effective_end(latest, latest, confirmations);
        Ok(inner.select(i64::MIN, end, &[sig], &address).pop())
    }

    async fn latest_logs_with_confs(
        &self,
        from_block: i64,
        sigs: &[Hash],
        addresses: &[Address],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let inner = self.lock();
        let Some(latest) = inner.latest_number() else {
            return Ok(vec![]);
        };
        let end = effective_end(latest, latest, confirmations);
        let mut out = Vec::new();
        for address in addresses {
            for sig in sigs {
                if let Some(log) = inner.select(from_block, end, &[*sig], address).pop() {
                    out.push(log);
                }
            }
        }
        out.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(out)
    }

    async fn logs_by_topic_values(
        &self,
        sig: Hash,
        address: Address,
        topic_index: usize,
        values: &[Hash],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let inner = self.lock();
        let Some(latest) = inner.latest_number() else {
            return Ok(vec![]);
        };
        let end = effective_end(latest, latest, confirmations);
        Ok(inner
            .select(i64::MIN, end, &[sig], &address)
            .into_iter()
            .filter(|l| l.topic(topic_index).is_some_and(|t| values.contains(&t)))
            .collect())
    }

    async fn logs_by_topic_range(
        &self,
        sig: Hash,
        address: Address,
        topic_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let inner = self.lock();
        let Some(latest) = inner.latest_number() else {
            return Ok(vec![]);
        };
        let end = effective_end(latest, latest, confirmations);
        Ok(inner
            .select(i64::MIN, end, &[sig], &address)
            .into_iter()
            .filter(|l| {
                l.topic(topic_index)
                    .is_some_and(|t| t >= min && t <= max)
            })
            .collect())
    }

    async fn logs_by_word_range(
        &self,
        sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let inner = self.lock();
        let Some(latest) = inner.latest_number() else {
            return Ok(vec![]);
        };
        let end = effective_end(latest, latest, confirmations);
        Ok(inner
            .select(i64::MIN, end, &[sig], &address)
            .into_iter()
            .filter(|l| {
                l.data_word(word_index)
                    .is_some_and(|w| w >= min && w <= max)
            })
            .collect())
    }

    async fn logs_by_word_min(
        &self,
        sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let inner = self.lock();
        let Some(latest) = inner.latest_number() else {
            return Ok(vec![]);
        };
        let end = effective_end(latest, latest, confirmations);
        Ok(inner
            .select(i64::MIN, end, &[sig], &address)
            .into_iter()
            .filter(|l| l.data_word(word_index).is_some_and(|w| w >= min))
            .collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
