//! Service surface over the poller: lifecycle, filter management, and
//! confirmation-aware queries behind one `LogIndexer` trait, plus the
//! always-erroring [`DisabledIndexer`] for configurations that opt out of
//! log indexing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use chainlog_core::error::PollerError;
use chainlog_core::filter::Filter;
use chainlog_core::store::LogStore;
use chainlog_core::types::{Address, BlockRecord, Hash, LogRecord};

use crate::client::ChainClient;
use crate::config::PollerConfig;
use crate::poller::{LogPoller, PollerStatus};

/// Everything a consumer can ask of the log indexer.
///
/// Query methods apply the shared confirmation rule: results are cut off at
/// `latest_stored - confirmations`, so a result that appears at N
/// confirmations stays visible at every depth below N until a reorg or
/// retention removes it.
#[async_trait]
pub trait LogIndexer: Send + Sync {
    async fn start(&self) -> Result<(), PollerError>;
    async fn stop(&self) -> Result<(), PollerError>;
    /// Ok once the background task is running.
    async fn ready(&self) -> Result<(), PollerError>;
    /// Ok while no fatal condition is latched; a deep reorg or detected
    /// corruption surfaces here until a cycle succeeds again.
    async fn healthy(&self) -> Result<(), PollerError>;

    /// Queue a re-derivation of all state from `from_block` upward.
    async fn replay(&self, from_block: i64) -> Result<(), PollerError>;

    /// Register (or update, keyed by name) a filter. Takes effect for
    /// blocks ingested after the call; use [`replay`](Self::replay) for
    /// history.
    async fn register_filter(&self, filter: Filter) -> Result<(), PollerError>;
    /// Remove a filter by name. Already-stored logs stay until retention.
    async fn unregister_filter(&self, name: &str) -> Result<(), PollerError>;

    async fn latest_block(&self) -> Result<Option<BlockRecord>, PollerError>;
    async fn blocks_in_range(&self, numbers: &[i64]) -> Result<Vec<BlockRecord>, PollerError>;

    async fn logs(
        &self,
        start: i64,
        end: i64,
        event_sig: Hash,
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn logs_with_sigs(
        &self,
        start: i64,
        end: i64,
        event_sigs: &[Hash],
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn latest_log_with_confs(
        &self,
        event_sig: Hash,
        address: Address,
        confirmations: u64,
    ) -> Result<Option<LogRecord>, PollerError>;

    /// Latest log per (signature, address) pair at or above `from_block`.
    async fn latest_logs_with_confs(
        &self,
        from_block: i64,
        event_sigs: &[Hash],
        addresses: &[Address],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn logs_by_topic_values(
        &self,
        event_sig: Hash,
        address: Address,
        topic_index: usize,
        values: &[Hash],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn logs_by_topic_range(
        &self,
        event_sig: Hash,
        address: Address,
        topic_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn logs_by_topic_min(
        &self,
        event_sig: Hash,
        address: Address,
        topic_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn logs_by_word_range(
        &self,
        event_sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;

    async fn logs_by_word_min(
        &self,
        event_sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError>;
}

fn check_range(start: i64, end: i64) -> Result<(), PollerError> {
    if start < 0 || end < 0 {
        return Err(PollerError::InvalidArgument(format!(
            "block range [{start}, {end}] has negative bounds"
        )));
    }
    if start > end {
        return Err(PollerError::InvalidArgument(format!(
            "block range [{start}, {end}] is inverted"
        )));
    }
    Ok(())
}

fn check_topic_index(topic_index: usize) -> Result<(), PollerError> {
    if !(1..=3).contains(&topic_index) {
        return Err(PollerError::InvalidArgument(format!(
            "topic index {topic_index} outside 1..=3"
        )));
    }
    Ok(())
}

fn check_non_empty<T>(items: &[T], what: &str) -> Result<(), PollerError> {
    if items.is_empty() {
        return Err(PollerError::InvalidArgument(format!("{what} list is empty")));
    }
    Ok(())
}

/// Owns the poller and its background task; the deployable unit.
pub struct IndexerService<C, S> {
    poller: Arc<LogPoller<C, S>>,
    shutdown: watch::Sender<bool>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<C, S> IndexerService<C, S>
where
    C: ChainClient + 'static,
    S: LogStore + 'static,
{
    pub fn new(client: C, store: S, config: PollerConfig) -> Self {
        let registry = Arc::new(chainlog_core::filter::FilterRegistry::new());
        let poller = Arc::new(LogPoller::new(client, store, registry, config));
        let (shutdown, _) = watch::channel(false);
        Self {
            poller,
            shutdown,
            task: AsyncMutex::new(None),
        }
    }

    pub fn poller(&self) -> &LogPoller<C, S> {
        &self.poller
    }

    pub fn store(&self) -> &S {
        self.poller.store()
    }

    pub fn status(&self) -> PollerStatus {
        self.poller.status()
    }
}

#[async_trait]
impl<C, S> LogIndexer for IndexerService<C, S>
where
    C: ChainClient + 'static,
    S: LogStore + 'static,
{
    async fn start(&self) -> Result<(), PollerError> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }
        self.shutdown.send_replace(false);
        let rx = self.shutdown.subscribe();
        let poller = self.poller.clone();
        *task = Some(tokio::spawn(async move { poller.run(rx).await }));
        Ok(())
    }

    async fn stop(&self) -> Result<(), PollerError> {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return Ok(());
        };
        self.shutdown.send_replace(true);
        handle
            .await
            .map_err(|e| PollerError::Storage(format!("poller task panicked: {e}")))?;
        Ok(())
    }

    async fn ready(&self) -> Result<(), PollerError> {
        if self.task.lock().await.is_none() {
            return Err(PollerError::NotStarted);
        }
        Ok(())
    }

    async fn healthy(&self) -> Result<(), PollerError> {
        self.ready().await?;
        if let Some(fatal) = self.poller.status().fatal {
            return Err(fatal);
        }
        Ok(())
    }

    async fn replay(&self, from_block: i64) -> Result<(), PollerError> {
        self.poller.request_replay(from_block)
    }

    async fn register_filter(&self, filter: Filter) -> Result<(), PollerError> {
        self.poller.registry().register(filter)
    }

    async fn unregister_filter(&self, name: &str) -> Result<(), PollerError> {
        self.poller.registry().unregister(name)
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, PollerError> {
        self.poller.store().latest_block().await
    }

    async fn blocks_in_range(&self, numbers: &[i64]) -> Result<Vec<BlockRecord>, PollerError> {
        self.poller.store().blocks_in_range(numbers).await
    }

    async fn logs(
        &self,
        start: i64,
        end: i64,
        event_sig: Hash,
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        check_range(start, end)?;
        self.poller.store().logs_by_range(start, end, event_sig, address).await
    }

    async fn logs_with_sigs(
        &self,
        start: i64,
        end: i64,
        event_sigs: &[Hash],
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        check_range(start, end)?;
        check_non_empty(event_sigs, "event signature")?;
        self.poller
            .store()
            .logs_with_sigs(start, end, event_sigs, address)
            .await
    }

    async fn latest_log_with_confs(
        &self,
        event_sig: Hash,
        address: Address,
        confirmations: u64,
    ) -> Result<Option<LogRecord>, PollerError> {
        self.poller
            .store()
            .latest_log_with_confs(event_sig, address, confirmations)
            .await
    }

    async fn latest_logs_with_confs(
        &self,
        from_block: i64,
        event_sigs: &[Hash],
        addresses: &[Address],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        if from_block < 0 {
            return Err(PollerError::InvalidArgument(format!(
                "from_block {from_block} must be >= 0"
            )));
        }
        check_non_empty(event_sigs, "event signature")?;
        check_non_empty(addresses, "address")?;
        self.poller
            .store()
            .latest_logs_with_confs(from_block, event_sigs, addresses, confirmations)
            .await
    }

    async fn logs_by_topic_values(
        &self,
        event_sig: Hash,
        address: Address,
        topic_index: usize,
        values: &[Hash],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        check_topic_index(topic_index)?;
        check_non_empty(values, "topic value")?;
        self.poller
            .store()
            .logs_by_topic_values(event_sig, address, topic_index, values, confirmations)
            .await
    }

    async fn logs_by_topic_range(
        &self,
        event_sig: Hash,
        address: Address,
        topic_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        check_topic_index(topic_index)?;
        self.poller
            .store()
            .logs_by_topic_range(event_sig, address, topic_index, min, max, confirmations)
            .await
    }

    async fn logs_by_topic_min(
        &self,
        event_sig: Hash,
        address: Address,
        topic_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        check_topic_index(topic_index)?;
        self.poller
            .store()
            .logs_by_topic_range(event_sig, address, topic_index, min, Hash([0xff; 32]), confirmations)
            .await
    }

    async fn logs_by_word_range(
        &self,
        event_sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        max: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        self.poller
            .store()
            .logs_by_word_range(event_sig, address, word_index, min, max, confirmations)
            .await
    }

    async fn logs_by_word_min(
        &self,
        event_sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        self.poller
            .store()
            .logs_by_word_min(event_sig, address, word_index, min, confirmations)
            .await
    }
}

/// Null-object indexer for deployments with log indexing switched off.
///
/// Every method, lifecycle included, returns [`PollerError::Disabled`];
/// callers holding a `dyn LogIndexer` need no special-casing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledIndexer;

#[async_trait]
impl LogIndexer for DisabledIndexer {
    async fn start(&self) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn stop(&self) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn ready(&self) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn healthy(&self) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn replay(&self, _from_block: i64) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn register_filter(&self, _filter: Filter) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn unregister_filter(&self, _name: &str) -> Result<(), PollerError> {
        Err(PollerError::Disabled)
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn blocks_in_range(&self, _numbers: &[i64]) -> Result<Vec<BlockRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs(
        &self,
        _start: i64,
        _end: i64,
        _event_sig: Hash,
        _address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs_with_sigs(
        &self,
        _start: i64,
        _end: i64,
        _event_sigs: &[Hash],
        _address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn latest_log_with_confs(
        &self,
        _event_sig: Hash,
        _address: Address,
        _confirmations: u64,
    ) -> Result<Option<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn latest_logs_with_confs(
        &self,
        _from_block: i64,
        _event_sigs: &[Hash],
        _addresses: &[Address],
        _confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs_by_topic_values(
        &self,
        _event_sig: Hash,
        _address: Address,
        _topic_index: usize,
        _values: &[Hash],
        _confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs_by_topic_range(
        &self,
        _event_sig: Hash,
        _address: Address,
        _topic_index: usize,
        _min: Hash,
        _max: Hash,
        _confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs_by_topic_min(
        &self,
        _event_sig: Hash,
        _address: Address,
        _topic_index: usize,
        _min: Hash,
        _confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs_by_word_range(
        &self,
        _event_sig: Hash,
        _address: Address,
        _word_index: usize,
        _min: Hash,
        _max: Hash,
        _confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }

    async fn logs_by_word_min(
        &self,
        _event_sig: Hash,
        _address: Address,
        _word_index: usize,
        _min: Hash,
        _confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        Err(PollerError::Disabled)
    }
}
