//! Durable log-store contract.
//!
//! Backends live in `chainlog-storage` (memory, SQLite). The sync engine is
//! the only writer; readers run concurrently and observe only committed
//! state — `insert_block_range` and `delete_from` must each be atomic with
//! respect to readers, so a reader never sees a block without its logs or a
//! dangling log without its block.

use async_trait::async_trait;

use crate::error::PollerError;
use crate::types::{Address, BlockRecord, Hash, LogRecord};

/// Clamp `requested_end` to the confirmation cutoff.
///
/// A block at height h is considered confirmed once
/// `h <= latest - confirmations`; `confirmations == 0` means up to the
/// latest known block. The result may be below `start` for the caller's
/// range — that yields an empty result, not an error.
pub fn effective_end(latest: i64, requested_end: i64, confirmations: u64) -> i64 {
    // Saturate: a depth beyond i64 must clamp the cutoff, not wrap past head.
    let confirmations = i64::try_from(confirmations).unwrap_or(i64::MAX);
    requested_end.min(latest.saturating_sub(confirmations))
}

/// Indexed storage of block headers and matched logs.
///
/// All log queries return results ordered by `(block_number, log_index)`
/// ascending. Confirmation-aware queries apply [`effective_end`] against the
/// store's latest block; an empty or negative range yields an empty result.
#[async_trait]
pub trait LogStore: Send + Sync {
    // ── Writes (sync engine only) ──────────────────────────────────────────

    /// Atomically insert a contiguous run of blocks together with their
    /// matched logs.
    async fn insert_block_range(
        &self,
        blocks: &[BlockRecord],
        logs: &[LogRecord],
    ) -> Result<(), PollerError>;

    /// Atomically delete all blocks at or above `height` together with
    /// their logs (cascade by block identity). Used by reorg rollback and
    /// replay.
    async fn delete_from(&self, height: i64) -> Result<(), PollerError>;

    /// Delete blocks (and their logs) whose timestamp is strictly older
    /// than `cutoff_timestamp`. Returns the number of blocks removed.
    async fn prune_older_than(&self, cutoff_timestamp: i64) -> Result<u64, PollerError>;

    // ── Block reads ────────────────────────────────────────────────────────

    /// Highest synced block, or `None` if the store is empty.
    async fn latest_block(&self) -> Result<Option<BlockRecord>, PollerError>;

    async fn block_by_number(&self, number: i64) -> Result<Option<BlockRecord>, PollerError>;

    /// Blocks for the requested numbers; missing numbers are simply absent
    /// from the result.
    async fn blocks_in_range(&self, numbers: &[i64]) -> Result<Vec<BlockRecord>, PollerError>;

    // ── Log reads ──────────────────────────────────────────────────────────

    async fn logs_by_range(
        &self,
        start: i64,
        end: i64,
        sig: Hash,
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError>;

    /// Like [`logs_by_range`](Self::logs_by_range) but OR-matched on any of
    /// `sigs`.
    async fn logs_with_sigs(
        &self,
        start: i64,
        end: i64,
        sigs: &[Hash],
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError>;

    /// Most recent confirmed log for `(sig, address)`, or `None`.
    async fn latest_log_with_confs(
        &self,
        sig: Hash,
        address: Address,
        confirmations: u64,
    ) -> Result<Option<LogRecord>, PollerError>;

    /// The latest confirmed log per `(sig, address)` pair at or above
    /// `from_block`.
    async fn latest_logs_with_confs(
        &self,
        from_block: i64,
        sigs: &[Hash],
        addresses: &[Address],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    /// Confirmed logs whose topic at `topic_index` (1..=3) equals one of
    /// `values`.
    async fn logs_by_topic_values(
        &self,
        sig: Hash,
        address: Address,
        topic_index: usize,
        values: &[Hash],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    /// Confirmed logs whose topic at `topic_index` lies in `[min, max]`,
    /// compared as big-endian unsigned integers.
    async fn logs_by_topic_range(
        &self,
        sig: Hash,
        address: Address,
        topic_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    /// Confirmed logs whose 32-byte data word at `word_index` lies in
    /// `[min, max]`.
    async fn logs_by_word_range(
        &self,
        sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    /// Confirmed logs whose 32-byte data word at `word_index` is `>= min`.
    async fn logs_by_word_min(
        &self,
        sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_end_clamps() {
        // Head 105, 2 confirmations → nothing above 103.
        assert_eq!(effective_end(105, 105, 2), 103);
        // Requested end below the cutoff is untouched.
        assert_eq!(effective_end(105, 101, 2), 101);
        // Zero confirmations → up to the latest block.
        assert_eq!(effective_end(105, 200, 0), 105);
        // Cutoff can fall below any valid height — callers get empty results.
        assert_eq!(effective_end(1, 10, 5), -4);
    }

    #[test]
    fn effective_end_saturates_on_huge_depth() {
        // A depth past i64 must clamp, never wrap above head.
        assert!(effective_end(105, 105, u64::MAX) < 0);
        assert!(effective_end(105, 105, i64::MAX as u64 + 1) < 0);
        assert_eq!(effective_end(i64::MIN, 10, u64::MAX), i64::MIN);
    }
}
