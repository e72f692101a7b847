//! chainlog-core — foundation for the reorg-safe log-indexing engine.
//!
//! # Architecture
//!
//! ```text
//! LogIndexer (service trait, chainlog-engine)
//!     ├── FilterRegistry   (named interest filters, union query set)
//!     ├── LogPoller        (head check → reorg check → backfill → persist)
//!     ├── RetryPolicy      (backoff for transient RPC/storage errors)
//!     └── LogStore         (block headers + matched logs; memory / SQLite)
//! ```

pub mod error;
pub mod filter;
pub mod retry;
pub mod store;
pub mod types;

pub use error::PollerError;
pub use filter::{Filter, FilterRegistry, FilterSet};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::LogStore;
pub use types::{Address, BlockRecord, Hash, LogRecord};
