//! The log-polling sync engine.
//!
//! One background task repeats a strictly sequential cycle:
//!
//! ```text
//! Idle → HeadCheck → ReorgCheck → Backfill → Persist → Idle
//! ```
//!
//! Replay requests are queued and consumed at the start of the next cycle,
//! never mid-flight, so readers can never observe a partial rollback.
//! Confirmation filtering happens at query time — unconfirmed heights are
//! stored immediately so accrued confirmations need no re-fetch.

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};

use chainlog_core::error::PollerError;
use chainlog_core::filter::FilterRegistry;
use chainlog_core::retry::RetryPolicy;
use chainlog_core::store::LogStore;
use chainlog_core::types::{BlockRecord, Hash, LogRecord};

use crate::client::{ChainClient, ChainHead};
use crate::config::PollerConfig;

use std::sync::Arc;

/// The phase a poll cycle is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollerState {
    #[default]
    Idle,
    HeadCheck,
    ReorgCheck,
    Backfill,
    Persist,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::HeadCheck => write!(f, "head-check"),
            Self::ReorgCheck => write!(f, "reorg-check"),
            Self::Backfill => write!(f, "backfill"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// Introspectable engine status backing readiness/health checks.
#[derive(Debug, Clone, Default)]
pub struct PollerStatus {
    pub state: PollerState,
    /// Highest height persisted by the most recent successful persist step.
    pub last_synced: Option<i64>,
    pub consecutive_failures: u32,
    /// Set when a cycle fails fatally (`ReorgTooDeep`, `Corruption`);
    /// cleared by the next successful cycle.
    pub fatal: Option<PollerError>,
}

/// The reorg-safe log poller.
///
/// Generic over the chain client and log store; the single writer to the
/// store. All concurrency is external: wrap it in an `Arc`, spawn
/// [`run`](Self::run) once, and query the store freely.
pub struct LogPoller<C, S> {
    client: C,
    store: S,
    registry: Arc<FilterRegistry>,
    config: PollerConfig,
    policy: RetryPolicy,
    status: Mutex<PollerStatus>,
    replay_tx: mpsc::UnboundedSender<i64>,
    replay_rx: Mutex<mpsc::UnboundedReceiver<i64>>,
}

impl<C: ChainClient, S: LogStore> LogPoller<C, S> {
    pub fn new(client: C, store: S, registry: Arc<FilterRegistry>, config: PollerConfig) -> Self {
        let (replay_tx, replay_rx) = mpsc::unbounded_channel();
        Self {
            client,
            store,
            policy: RetryPolicy::new(config.retry.clone()),
            registry,
            config,
            status: Mutex::new(PollerStatus::default()),
            replay_tx,
            replay_rx: Mutex::new(replay_rx),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn status(&self) -> PollerStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queue a replay from `from` (inclusive); consumed at the start of the
    /// next cycle. The consuming cycle truncates the store at `from` and
    /// re-derives everything above it.
    pub fn request_replay(&self, from: i64) -> Result<(), PollerError> {
        if from < 0 {
            return Err(PollerError::InvalidArgument(format!(
                "replay block {from} must be >= 0"
            )));
        }
        // Send only fails when the engine is gone entirely.
        self.replay_tx
            .send(from)
            .map_err(|_| PollerError::Storage("replay queue closed".into()))?;
        tracing::info!(from, "replay queued");
        Ok(())
    }

    /// Run poll cycles until `shutdown` flips to `true`. Cancellation is
    /// honored at step boundaries only, so an in-flight persist transaction
    /// always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("log poller started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_once_inner(Some(&shutdown)).await {
                tracing::warn!(%err, "poll cycle failed");
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!("log poller stopped");
    }

    /// Execute exactly one poll cycle. Exposed for deterministic tests and
    /// operator tooling; the background task calls the same path.
    pub async fn run_once(&self) -> Result<(), PollerError> {
        self.run_once_inner(None).await
    }

    async fn run_once_inner(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<(), PollerError> {
        let result = self.cycle(shutdown).await;
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.state = PollerState::Idle;
        match &result {
            Ok(()) => {
                status.consecutive_failures = 0;
                status.fatal = None;
            }
            Err(err) => {
                status.consecutive_failures += 1;
                if err.is_fatal() {
                    status.fatal = Some(err.clone());
                }
            }
        }
        result
    }

    async fn cycle(&self, shutdown: Option<&watch::Receiver<bool>>) -> Result<(), PollerError> {
        // Queued replays first: truncate so the backfill below re-derives
        // from the requested height.
        if let Some(from) = self.take_replay_request() {
            tracing::info!(from, "replaying — truncating stored state");
            self.store.delete_from(from).await?;
        }

        self.set_state(PollerState::HeadCheck);
        let head = self.with_retry("head check", || self.client.head()).await?;

        if cancelled(shutdown) {
            return Ok(());
        }

        self.set_state(PollerState::ReorgCheck);
        let start = self.sync_start(&head).await?;
        if start > head.number {
            // Nothing new; still give retention a chance to run.
            return self.retention_sweep().await;
        }

        if cancelled(shutdown) {
            return Ok(());
        }

        let filters = self.registry.snapshot();
        let addresses = filters.addresses();
        let event_sigs = filters.event_sigs();

        // The last persisted hash below the backfill window, if any, for
        // ancestry verification of the fetched headers.
        let mut prev_hash: Option<Hash> = self
            .store
            .block_by_number(start - 1)
            .await?
            .map(|b| b.hash);

        let mut current = start;
        while current <= head.number {
            self.set_state(PollerState::Backfill);
            let chunk_end =
                (current + self.config.backfill_batch_size as i64 - 1).min(head.number);

            let mut blocks = Vec::with_capacity((chunk_end - current + 1) as usize);
            for number in current..=chunk_end {
                let header = self
                    .with_retry("header fetch", || self.client.header_by_number(number))
                    .await?
                    .ok_or_else(|| {
                        PollerError::Rpc(format!("chain has no header at {number}"))
                    })?;
                blocks.push(header);
            }

            // Fetched headers must chain onto what we already hold. A break
            // here means the chain moved under us mid-fetch; the next
            // cycle's reorg check repairs it.
            for block in &blocks {
                if let Some(prev) = prev_hash {
                    if block.parent_hash != prev {
                        return Err(PollerError::Rpc(format!(
                            "fetched headers do not chain at block {}",
                            block.number
                        )));
                    }
                }
                prev_hash = Some(block.hash);
            }

            let logs: Vec<LogRecord> = if filters.is_empty() {
                vec![]
            } else {
                self.with_retry("log fetch", || {
                    self.client
                        .logs_in_range(current, chunk_end, &addresses, &event_sigs)
                })
                .await?
                .into_iter()
                // The client may return a superset of the union filter;
                // only logs some registered filter wants are persisted.
                .filter(|l| filters.matches(&l.address, &l.event_sig))
                .collect()
            };

            self.set_state(PollerState::Persist);
            for sub in blocks.chunks(self.config.persist_batch_size as usize) {
                let sub_start = sub[0].number;
                let sub_end = sub[sub.len() - 1].number;
                let sub_logs: Vec<LogRecord> = logs
                    .iter()
                    .filter(|l| l.block_number >= sub_start && l.block_number <= sub_end)
                    .cloned()
                    .collect();
                self.store.insert_block_range(sub, &sub_logs).await?;
                self.set_last_synced(sub_end);
                tracing::debug!(
                    from = sub_start,
                    to = sub_end,
                    logs = sub_logs.len(),
                    "range persisted"
                );
            }

            current = chunk_end + 1;

            if cancelled(shutdown) {
                return Ok(());
            }
        }

        tracing::info!(from = start, to = head.number, "backfill complete");
        self.retention_sweep().await
    }

    /// Determine the first height to backfill, repairing any reorged tail.
    async fn sync_start(&self, head: &ChainHead) -> Result<i64, PollerError> {
        let Some(mut last) = self.store.latest_block().await? else {
            return Ok(self.config.start_block.unwrap_or(head.number));
        };

        if head.number < last.number {
            // The chain itself shrank below our tail; nothing above head is
            // verifiable anymore.
            tracing::warn!(
                head = head.number,
                last = last.number,
                "chain head below last synced height, truncating"
            );
            self.store.delete_from(head.number + 1).await?;
            match self.store.latest_block().await? {
                Some(block) => last = block,
                None => return Ok(self.config.start_block.unwrap_or(head.number)),
            }
        }

        let ancestor = self.find_common_ancestor(&last).await?;
        if ancestor < last.number {
            tracing::warn!(
                ancestor,
                last = last.number,
                depth = last.number - ancestor,
                "reorg detected, rolling back"
            );
            self.store.delete_from(ancestor + 1).await?;
        }
        Ok(ancestor + 1)
    }

    /// Walk backward from the last synced height comparing stored hashes
    /// against the chain until they agree. Returns the common ancestor
    /// height (`-1` if the whole stored chain was replaced), or
    /// `ReorgTooDeep` once the walk would exceed the configured bound.
    async fn find_common_ancestor(&self, last: &BlockRecord) -> Result<i64, PollerError> {
        let floor = last.number - self.config.max_reorg_depth as i64;
        let mut height = last.number;
        loop {
            let stored = if height == last.number {
                Some(last.clone())
            } else {
                self.store.block_by_number(height).await?
            };
            let Some(stored) = stored else {
                // Below the stored window nothing is verifiable; everything
                // above gets re-derived.
                return Ok(height);
            };

            let chain = self
                .with_retry("reorg check header", || self.client.header_by_number(height))
                .await?;
            if chain.map(|h| h.hash) == Some(stored.hash) {
                return Ok(height);
            }

            if height <= floor {
                return Err(PollerError::ReorgTooDeep {
                    block_number: last.number,
                    max_depth: self.config.max_reorg_depth,
                });
            }
            if height == 0 {
                return Ok(-1);
            }
            height -= 1;
        }
    }

    /// Prune records no registered filter still needs. The latest block is
    /// always kept so the sync position survives the sweep.
    async fn retention_sweep(&self) -> Result<(), PollerError> {
        let Some(window) = self.registry.snapshot().max_retention() else {
            return Ok(());
        };
        let Some(latest) = self.store.latest_block().await? else {
            return Ok(());
        };
        let cutoff = (chrono::Utc::now().timestamp() - window.as_secs() as i64)
            .min(latest.timestamp);
        let pruned = self.store.prune_older_than(cutoff).await?;
        if pruned > 0 {
            tracing::debug!(pruned, cutoff, "retention sweep");
        }
        Ok(())
    }

    fn take_replay_request(&self) -> Option<i64> {
        let mut rx = self.replay_rx.lock().unwrap_or_else(|e| e.into_inner());
        let mut lowest: Option<i64> = None;
        while let Ok(from) = rx.try_recv() {
            lowest = Some(lowest.map_or(from, |l| l.min(from)));
        }
        lowest
    }

    fn set_state(&self, state: PollerState) {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).state = state;
    }

    fn set_last_synced(&self, height: i64) {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_synced = Some(height);
    }

    /// Run `op` under the RPC timeout, retrying transient failures with
    /// exponential backoff. Non-transient errors propagate immediately.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PollerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PollerError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match tokio::time::timeout(self.config.rpc_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => PollerError::Rpc(format!("{what} timed out")),
            };
            attempt += 1;
            match self.policy.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(%err, what, attempt, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            }
        }
    }
}

fn cancelled(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
