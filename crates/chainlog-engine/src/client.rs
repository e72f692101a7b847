//! Chain-client abstraction the sync engine polls against.
//!
//! Implementations wrap a JSON-RPC provider (or the in-process
//! [`SimChain`](crate::sim::SimChain)). The client is assumed eventually
//! consistent and occasionally erroring; all errors it returns should be
//! `PollerError::Rpc` so the engine's retry policy applies.

use async_trait::async_trait;

use chainlog_core::error::PollerError;
use chainlog_core::types::{Address, BlockRecord, Hash, LogRecord};

/// Height and hash of the chain head as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub number: i64,
    pub hash: Hash,
}

/// Read-only view of the external chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head height and hash.
    async fn head(&self) -> Result<ChainHead, PollerError>;

    /// Header at `number`, or `None` if the chain has no block there.
    async fn header_by_number(&self, number: i64) -> Result<Option<BlockRecord>, PollerError>;

    /// Logs in `[from, to]` emitted by any of `addresses` with any of
    /// `event_sigs` as topic 0. An empty address (resp. signature) list
    /// matches everything on that axis, mirroring RPC filter semantics.
    async fn logs_in_range(
        &self,
        from: i64,
        to: i64,
        addresses: &[Address],
        event_sigs: &[Hash],
    ) -> Result<Vec<LogRecord>, PollerError>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for std::sync::Arc<T> {
    async fn head(&self) -> Result<ChainHead, PollerError> {
        (**self).head().await
    }

    async fn header_by_number(&self, number: i64) -> Result<Option<BlockRecord>, PollerError> {
        (**self).header_by_number(number).await
    }

    async fn logs_in_range(
        &self,
        from: i64,
        to: i64,
        addresses: &[Address],
        event_sigs: &[Hash],
    ) -> Result<Vec<LogRecord>, PollerError> {
        (**self).logs_in_range(from, to, addresses, event_sigs).await
    }
}
