//! Deterministic in-process chain for tests and the CLI demo.
//!
//! `SimChain` grows one block at a time, attaches logs to blocks, forks its
//! tail on demand (reorgs), and injects transient RPC failures — everything
//! the engine's failure paths need, with fully reproducible hashes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use chainlog_core::error::PollerError;
use chainlog_core::types::{Address, BlockRecord, Hash, LogRecord};

use crate::client::{ChainClient, ChainHead};

/// A log to attach when pushing a block.
#[derive(Debug, Clone)]
pub struct SimLog {
    pub address: Address,
    pub event_sig: Hash,
    /// Indexed topics beyond topic 0 (at most 3).
    pub extra_topics: Vec<Hash>,
    pub data: Vec<u8>,
}

impl SimLog {
    pub fn new(address: Address, event_sig: Hash) -> Self {
        Self {
            address,
            event_sig,
            extra_topics: vec![],
            data: vec![],
        }
    }

    pub fn topic(mut self, t: Hash) -> Self {
        self.extra_topics.push(t);
        self
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Default)]
struct SimInner {
    /// Canonical chain, ascending by number; blocks[i].number == i.
    blocks: Vec<BlockRecord>,
    /// Logs keyed by block hash, so forked-away logs disappear with their
    /// block.
    logs: HashMap<Hash, Vec<LogRecord>>,
    /// Distinguishes hashes minted before and after a fork.
    salt: u64,
    /// Remaining client calls that fail with a transient RPC error.
    fail_next: u32,
}

impl SimInner {
    fn mint_hash(&self, number: i64) -> Hash {
        let mut bytes = [0u8; 32];
        bytes[0..8].copy_from_slice(&self.salt.to_be_bytes());
        bytes[24..32].copy_from_slice(&(number as u64).to_be_bytes());
        Hash(bytes)
    }

    fn push_block(&mut self, logs: Vec<SimLog>) -> BlockRecord {
        let number = self.blocks.len() as i64;
        let parent_hash = self
            .blocks
            .last()
            .map(|b| b.hash)
            .unwrap_or_default();
        let block = BlockRecord {
            number,
            hash: self.mint_hash(number),
            parent_hash,
            timestamp: number * 12,
        };
        let records: Vec<LogRecord> = logs
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                let mut topics = vec![l.event_sig];
                topics.extend(l.extra_topics);
                LogRecord {
                    block_number: number,
                    block_hash: block.hash,
                    tx_hash: self.mint_hash(number * 1_000 + i as i64 + 1),
                    log_index: i as i64,
                    address: l.address,
                    event_sig: l.event_sig,
                    topics,
                    data: l.data,
                }
            })
            .collect();
        self.logs.insert(block.hash, records);
        self.blocks.push(block.clone());
        block
    }
}

/// Deterministic simulated chain implementing [`ChainClient`].
#[derive(Debug, Default)]
pub struct SimChain {
    inner: Mutex<SimInner>,
}

impl SimChain {
    /// An empty chain — push the genesis block before polling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with `height + 1` empty blocks (genesis at 0).
    pub fn with_height(height: i64) -> Self {
        let chain = Self::new();
        for _ in 0..=height {
            chain.push_block(vec![]);
        }
        chain
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one block carrying `logs`; returns the new block.
    pub fn push_block(&self, logs: Vec<SimLog>) -> BlockRecord {
        self.lock().push_block(logs)
    }

    /// Drop all blocks at or above `height` and switch to a new fork, so
    /// re-mined heights get different hashes.
    pub fn fork_at(&self, height: i64) {
        let mut inner = self.lock();
        inner.blocks.truncate(height as usize);
        inner.salt += 1;
    }

    /// The next `n` client calls fail with a transient RPC error.
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    pub fn head_number(&self) -> i64 {
        self.lock().blocks.len() as i64 - 1
    }

    pub fn hash_at(&self, number: i64) -> Option<Hash> {
        self.lock().blocks.get(number as usize).map(|b| b.hash)
    }

    fn check_failure(&self) -> Result<(), PollerError> {
        let mut inner = self.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(PollerError::Rpc("simulated transient failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for SimChain {
    async fn head(&self) -> Result<ChainHead, PollerError> {
        self.check_failure()?;
        let inner = self.lock();
        let head = inner
            .blocks
            .last()
            .ok_or_else(|| PollerError::Rpc("simulated chain is empty".into()))?;
        Ok(ChainHead {
            number: head.number,
            hash: head.hash,
        })
    }

    async fn header_by_number(&self, number: i64) -> Result<Option<BlockRecord>, PollerError> {
        self.check_failure()?;
        if number < 0 {
            return Ok(None);
        }
        Ok(self.lock().blocks.get(number as usize).cloned())
    }

    async fn logs_in_range(
        &self,
        from: i64,
        to: i64,
        addresses: &[Address],
        event_sigs: &[Hash],
    ) -> Result<Vec<LogRecord>, PollerError> {
        self.check_failure()?;
        let inner = self.lock();
        let mut out = Vec::new();
        for block in &inner.blocks {
            if block.number < from || block.number > to {
                continue;
            }
            if let Some(logs) = inner.logs.get(&block.hash) {
                for log in logs {
                    let addr_ok = addresses.is_empty() || addresses.contains(&log.address);
                    let sig_ok = event_sigs.is_empty() || event_sigs.contains(&log.event_sig);
                    if addr_ok && sig_ok {
                        out.push(log.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grows_a_linked_chain() {
        let chain = SimChain::with_height(3);
        let b2 = chain.header_by_number(2).await.unwrap().unwrap();
        let b3 = chain.header_by_number(3).await.unwrap().unwrap();
        assert!(b3.extends(&b2));
        assert_eq!(chain.head().await.unwrap().number, 3);
        assert!(chain.header_by_number(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fork_changes_hashes_from_height() {
        let chain = SimChain::with_height(5);
        let old_hash = chain.hash_at(4).unwrap();

        chain.fork_at(4);
        chain.push_block(vec![]);
        chain.push_block(vec![]);

        assert_eq!(chain.head_number(), 5);
        assert_ne!(chain.hash_at(4).unwrap(), old_hash);
        // The fork still extends the untouched prefix.
        let b3 = chain.header_by_number(3).await.unwrap().unwrap();
        let b4 = chain.header_by_number(4).await.unwrap().unwrap();
        assert!(b4.extends(&b3));
    }

    #[tokio::test]
    async fn log_filters_match_rpc_semantics() {
        let chain = SimChain::with_height(0);
        let aa = Address::from_u64(0xAA);
        let bb = Address::from_u64(0xBB);
        let sig = Hash::from_u64(1);
        chain.push_block(vec![SimLog::new(aa, sig), SimLog::new(bb, sig)]);

        let logs = chain.logs_in_range(0, 10, &[aa], &[sig]).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, aa);

        // Empty address list matches all addresses.
        let logs = chain.logs_in_range(0, 10, &[], &[sig]).await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let chain = SimChain::with_height(1);
        chain.fail_next(2);
        assert!(chain.head().await.is_err());
        assert!(chain.head().await.is_err());
        assert!(chain.head().await.is_ok());
    }
}
