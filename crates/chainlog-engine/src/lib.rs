//! Reorg-safe chain log indexing engine.
//!
//! Wires a [`ChainClient`] to a [`LogStore`](chainlog_core::store::LogStore)
//! through a single-writer poll loop:
//!
//! ```text
//!   ChainClient ──▶ LogPoller ──▶ LogStore
//!       ▲           (head check,      ▲
//!       │            reorg check,     │ confirmation-aware
//!   SimChain         backfill,        │ queries
//!   (tests/demo)     persist)     IndexerService
//! ```
//!
//! [`IndexerService`] adds lifecycle and the query surface; deployments
//! that switch indexing off use [`DisabledIndexer`] behind the same
//! [`LogIndexer`] trait.

pub mod client;
pub mod config;
pub mod poller;
pub mod service;
pub mod sim;

pub use client::{ChainClient, ChainHead};
pub use config::PollerConfig;
pub use poller::{LogPoller, PollerState, PollerStatus};
pub use service::{DisabledIndexer, IndexerService, LogIndexer};
pub use sim::{SimChain, SimLog};
