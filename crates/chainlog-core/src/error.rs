//! Error types for the log-polling pipeline.

use thiserror::Error;

/// Errors that can occur while polling, storing, or querying logs.
#[derive(Debug, Clone, Error)]
pub enum PollerError {
    /// Sentinel returned by the disabled engine variant for every operation.
    #[error("log indexer disabled")]
    Disabled,

    /// Lifecycle methods were called before `start`.
    #[error("log indexer not started")]
    NotStarted,

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("filter not found: {0}")]
    FilterNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("reorg at block {block_number} deeper than {max_depth} blocks")]
    ReorgTooDeep { block_number: i64, max_depth: u64 },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage corruption: {0}")]
    Corruption(String),
}

impl PollerError {
    /// Returns `true` if the error is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_))
    }

    /// Returns `true` if the error must be surfaced through health checks
    /// rather than retried (operator attention required).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReorgTooDeep { .. } | Self::Corruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PollerError::Rpc("timeout".into()).is_transient());
        assert!(PollerError::Storage("locked".into()).is_transient());
        assert!(!PollerError::Disabled.is_transient());
        assert!(!PollerError::ReorgTooDeep { block_number: 5, max_depth: 3 }.is_transient());
    }

    #[test]
    fn fatal_classification() {
        assert!(PollerError::ReorgTooDeep { block_number: 5, max_depth: 3 }.is_fatal());
        assert!(PollerError::Corruption("parent hash mismatch".into()).is_fatal());
        assert!(!PollerError::Rpc("timeout".into()).is_fatal());
    }
}
