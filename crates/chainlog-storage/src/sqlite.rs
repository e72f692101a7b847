//! SQLite log store.
//!
//! Persists block headers and matched logs to a single SQLite file using
//! `sqlx` with WAL mode for concurrent read performance. Hashes and
//! addresses are stored as fixed-width lowercase hex so lexicographic SQL
//! comparison equals big-endian numeric order; log payloads are stored as
//! unprefixed hex so data-word filters reduce to `substr` ranges.
//!
//! Every operation is exposed two ways:
//! - as a free function over `&mut SqliteConnection`, so callers can scope
//!   it inside their own `sqlx` transaction and compose it with their own
//!   atomic units of work;
//! - through [`SqliteLogStore`]'s `LogStore` impl, which wraps each write
//!   in one transaction of its own, so readers never observe a block
//!   without its logs.
//!
//! # Usage
//! ```rust,no_run
//! use chainlog_storage::sqlite::{self, SqliteLogStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteLogStore::open("./chainlog.db").await?;
//!
//! // Compose writes with caller-owned work in one transaction.
//! let mut tx = store.pool().begin().await?;
//! sqlite::delete_from(&mut tx, 500).await?;
//! // ... caller's own statements on `tx` ...
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use chainlog_core::error::PollerError;
use chainlog_core::store::LogStore;
use chainlog_core::types::{bytes_from_hex, bytes_to_hex, Address, BlockRecord, Hash, LogRecord};

/// Confirmation cutoff as a SQL fragment: the highest confirmed height.
const CONFIRMED_MAX: &str = "(SELECT COALESCE(MAX(number), -1) FROM blocks) - ?";

/// SQLite-backed [`LogStore`].
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainlog.db"`) or a full
    /// SQLite URL (`"sqlite:./chainlog.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, PollerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| PollerError::Storage(e.to_string()))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. All data is lost on drop.
    ///
    /// A single pooled connection, since each `:memory:` connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self, PollerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| PollerError::Storage(e.to_string()))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// The underlying pool — begin a transaction here to scope the free
    /// functions in this module with caller-owned work.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables, indexes, and enable WAL mode.
    async fn init_schema(&self) -> Result<(), PollerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                number      INTEGER PRIMARY KEY,
                hash        TEXT    NOT NULL,
                parent_hash TEXT    NOT NULL,
                timestamp   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS logs (
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                address      TEXT    NOT NULL,
                event_sig    TEXT    NOT NULL,
                topic1       TEXT,
                topic2       TEXT,
                topic3       TEXT,
                data         TEXT    NOT NULL,
                PRIMARY KEY (block_hash, tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Indexes for the query shapes the engine serves.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_logs_sig_addr_block
             ON logs (event_sig, address, block_number, log_index);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_block ON logs (block_number);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> PollerError {
    PollerError::Storage(e.to_string())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn topic_column(topic_index: usize) -> Result<&'static str, PollerError> {
    match topic_index {
        1 => Ok("topic1"),
        2 => Ok("topic2"),
        3 => Ok("topic3"),
        other => Err(PollerError::InvalidArgument(format!(
            "topic index {other} out of range [1, 3]"
        ))),
    }
}

/// Clamp a confirmation depth into the signed domain SQL arithmetic uses.
fn confs_i64(confirmations: u64) -> i64 {
    i64::try_from(confirmations).unwrap_or(i64::MAX)
}

fn block_from_row(row: &SqliteRow) -> Result<BlockRecord, PollerError> {
    Ok(BlockRecord {
        number: row.get("number"),
        hash: parse_hash(row.get::<String, _>("hash"))?,
        parent_hash: parse_hash(row.get::<String, _>("parent_hash"))?,
        timestamp: row.get("timestamp"),
    })
}

fn log_from_row(row: &SqliteRow) -> Result<LogRecord, PollerError> {
    let event_sig = parse_hash(row.get::<String, _>("event_sig"))?;
    let mut topics = vec![event_sig];
    for col in ["topic1", "topic2", "topic3"] {
        match row.get::<Option<String>, _>(col) {
            Some(hex) => topics.push(parse_hash(hex)?),
            None => break,
        }
    }
    Ok(LogRecord {
        block_number: row.get("block_number"),
        block_hash: parse_hash(row.get::<String, _>("block_hash"))?,
        tx_hash: parse_hash(row.get::<String, _>("tx_hash"))?,
        log_index: row.get("log_index"),
        address: Address::from_hex(&row.get::<String, _>("address"))
            .map_err(|e| PollerError::Corruption(e.to_string()))?,
        event_sig,
        topics,
        data: bytes_from_hex(&row.get::<String, _>("data"))
            .map_err(|e| PollerError::Corruption(e.to_string()))?,
    })
}

fn parse_hash(hex: String) -> Result<Hash, PollerError> {
    Hash::from_hex(&hex).map_err(|e| PollerError::Corruption(e.to_string()))
}

async fn select_logs(
    conn: &mut SqliteConnection,
    sql: &str,
    binds: Vec<String>,
) -> Result<Vec<LogRecord>, PollerError> {
    let mut query = sqlx::query(sql);
    for bind in &binds {
        query = query.bind(bind);
    }
    let rows = query.fetch_all(conn).await.map_err(storage_err)?;
    rows.iter().map(log_from_row).collect()
}

// ─── Scoped operations ───────────────────────────────────────────────────────
//
// Each function runs against the caller's connection and starts no
// transaction of its own; scope atomicity with `pool().begin()` as needed.
// A `Transaction` derefs to a connection, so `&mut tx` works directly.

/// Insert a contiguous run of blocks together with their matched logs.
/// Upserts on block number and on `(block_hash, tx_hash, log_index)`.
pub async fn insert_block_range(
    conn: &mut SqliteConnection,
    blocks: &[BlockRecord],
    logs: &[LogRecord],
) -> Result<(), PollerError> {
    for block in blocks {
        sqlx::query(
            "INSERT OR REPLACE INTO blocks (number, hash, parent_hash, timestamp)
             VALUES (?, ?, ?, ?)",
        )
        .bind(block.number)
        .bind(block.hash.to_string())
        .bind(block.parent_hash.to_string())
        .bind(block.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    }

    for log in logs {
        sqlx::query(
            "INSERT OR REPLACE INTO logs
             (block_number, block_hash, tx_hash, log_index, address, event_sig,
              topic1, topic2, topic3, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.block_number)
        .bind(log.block_hash.to_string())
        .bind(log.tx_hash.to_string())
        .bind(log.log_index)
        .bind(log.address.to_string())
        .bind(log.event_sig.to_string())
        .bind(log.topic(1).map(|t| t.to_string()))
        .bind(log.topic(2).map(|t| t.to_string()))
        .bind(log.topic(3).map(|t| t.to_string()))
        .bind(bytes_to_hex(&log.data))
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    }
    Ok(())
}

/// Delete all blocks at or above `height` together with their logs.
pub async fn delete_from(conn: &mut SqliteConnection, height: i64) -> Result<(), PollerError> {
    sqlx::query("DELETE FROM logs WHERE block_number >= ?")
        .bind(height)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    sqlx::query("DELETE FROM blocks WHERE number >= ?")
        .bind(height)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}

/// Delete blocks (and their logs) with timestamps strictly older than
/// `cutoff_timestamp`. Returns the number of blocks removed.
pub async fn prune_older_than(
    conn: &mut SqliteConnection,
    cutoff_timestamp: i64,
) -> Result<u64, PollerError> {
    sqlx::query(
        "DELETE FROM logs WHERE block_number IN
         (SELECT number FROM blocks WHERE timestamp < ?)",
    )
    .bind(cutoff_timestamp)
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;
    let result = sqlx::query("DELETE FROM blocks WHERE timestamp < ?")
        .bind(cutoff_timestamp)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
    Ok(result.rows_affected())
}

pub async fn latest_block(conn: &mut SqliteConnection) -> Result<Option<BlockRecord>, PollerError> {
    let row = sqlx::query("SELECT * FROM blocks ORDER BY number DESC LIMIT 1")
        .fetch_optional(conn)
        .await
        .map_err(storage_err)?;
    row.as_ref().map(block_from_row).transpose()
}

pub async fn block_by_number(
    conn: &mut SqliteConnection,
    number: i64,
) -> Result<Option<BlockRecord>, PollerError> {
    let row = sqlx::query("SELECT * FROM blocks WHERE number = ?")
        .bind(number)
        .fetch_optional(conn)
        .await
        .map_err(storage_err)?;
    row.as_ref().map(block_from_row).transpose()
}

pub async fn blocks_in_range(
    conn: &mut SqliteConnection,
    numbers: &[i64],
) -> Result<Vec<BlockRecord>, PollerError> {
    if numbers.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT * FROM blocks WHERE number IN ({}) ORDER BY number",
        placeholders(numbers.len())
    );
    let mut query = sqlx::query(&sql);
    for n in numbers {
        query = query.bind(n);
    }
    let rows = query.fetch_all(conn).await.map_err(storage_err)?;
    rows.iter().map(block_from_row).collect()
}

pub async fn logs_by_range(
    conn: &mut SqliteConnection,
    start: i64,
    end: i64,
    sig: Hash,
    address: Address,
) -> Result<Vec<LogRecord>, PollerError> {
    select_logs(
        conn,
        "SELECT * FROM logs
         WHERE event_sig = ? AND address = ? AND block_number BETWEEN ? AND ?
         ORDER BY block_number, log_index",
        vec![
            sig.to_string(),
            address.to_string(),
            start.to_string(),
            end.to_string(),
        ],
    )
    .await
}

pub async fn logs_with_sigs(
    conn: &mut SqliteConnection,
    start: i64,
    end: i64,
    sigs: &[Hash],
    address: Address,
) -> Result<Vec<LogRecord>, PollerError> {
    if sigs.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT * FROM logs
         WHERE event_sig IN ({}) AND address = ? AND block_number BETWEEN ? AND ?
         ORDER BY block_number, log_index",
        placeholders(sigs.len())
    );
    let mut binds: Vec<String> = sigs.iter().map(|s| s.to_string()).collect();
    binds.push(address.to_string());
    binds.push(start.to_string());
    binds.push(end.to_string());
    select_logs(conn, &sql, binds).await
}

pub async fn latest_log_with_confs(
    conn: &mut SqliteConnection,
    sig: Hash,
    address: Address,
    confirmations: u64,
) -> Result<Option<LogRecord>, PollerError> {
    let sql = format!(
        "SELECT * FROM logs
         WHERE event_sig = ? AND address = ? AND block_number <= {CONFIRMED_MAX}
         ORDER BY block_number DESC, log_index DESC LIMIT 1"
    );
    let row = sqlx::query(&sql)
        .bind(sig.to_string())
        .bind(address.to_string())
        .bind(confs_i64(confirmations))
        .fetch_optional(conn)
        .await
        .map_err(storage_err)?;
    row.as_ref().map(log_from_row).transpose()
}

pub async fn latest_logs_with_confs(
    conn: &mut SqliteConnection,
    from_block: i64,
    sigs: &[Hash],
    addresses: &[Address],
    confirmations: u64,
) -> Result<Vec<LogRecord>, PollerError> {
    if sigs.is_empty() || addresses.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT * FROM logs AS l
         WHERE l.event_sig IN ({sigs}) AND l.address IN ({addrs})
           AND l.block_number >= ? AND l.block_number <= {CONFIRMED_MAX}
           AND NOT EXISTS (
             SELECT 1 FROM logs AS newer
             WHERE newer.event_sig = l.event_sig AND newer.address = l.address
               AND newer.block_number >= ? AND newer.block_number <= {CONFIRMED_MAX}
               AND (newer.block_number > l.block_number
                    OR (newer.block_number = l.block_number
                        AND newer.log_index > l.log_index)))
         ORDER BY l.block_number, l.log_index",
        sigs = placeholders(sigs.len()),
        addrs = placeholders(addresses.len()),
    );
    let mut binds: Vec<String> = sigs.iter().map(|s| s.to_string()).collect();
    binds.extend(addresses.iter().map(|a| a.to_string()));
    binds.push(from_block.to_string());
    binds.push(confs_i64(confirmations).to_string());
    binds.push(from_block.to_string());
    binds.push(confs_i64(confirmations).to_string());
    select_logs(conn, &sql, binds).await
}

pub async fn logs_by_topic_values(
    conn: &mut SqliteConnection,
    sig: Hash,
    address: Address,
    topic_index: usize,
    values: &[Hash],
    confirmations: u64,
) -> Result<Vec<LogRecord>, PollerError> {
    if values.is_empty() {
        return Ok(vec![]);
    }
    let column = topic_column(topic_index)?;
    let sql = format!(
        "SELECT * FROM logs
         WHERE event_sig = ? AND address = ? AND {column} IN ({values})
           AND block_number <= {CONFIRMED_MAX}
         ORDER BY block_number, log_index",
        values = placeholders(values.len()),
    );
    let mut binds = vec![sig.to_string(), address.to_string()];
    binds.extend(values.iter().map(|v| v.to_string()));
    binds.push(confs_i64(confirmations).to_string());
    select_logs(conn, &sql, binds).await
}

pub async fn logs_by_topic_range(
    conn: &mut SqliteConnection,
    sig: Hash,
    address: Address,
    topic_index: usize,
    min: Hash,
    max: Hash,
    confirmations: u64,
) -> Result<Vec<LogRecord>, PollerError> {
    let column = topic_column(topic_index)?;
    let sql = format!(
        "SELECT * FROM logs
         WHERE event_sig = ? AND address = ? AND {column} BETWEEN ? AND ?
           AND block_number <= {CONFIRMED_MAX}
         ORDER BY block_number, log_index"
    );
    select_logs(
        conn,
        &sql,
        vec![
            sig.to_string(),
            address.to_string(),
            min.to_string(),
            max.to_string(),
            confs_i64(confirmations).to_string(),
        ],
    )
    .await
}

pub async fn logs_by_word_range(
    conn: &mut SqliteConnection,
    sig: Hash,
    address: Address,
    word_index: usize,
    min: Hash,
    max: Hash,
    confirmations: u64,
) -> Result<Vec<LogRecord>, PollerError> {
    // data is unprefixed hex: word at index w starts at character
    // w * 64 + 1 (substr is 1-based).
    let sql = format!(
        "SELECT * FROM logs
         WHERE event_sig = ? AND address = ?
           AND length(data) >= CAST(? AS INTEGER)
           AND substr(data, ?, 64) BETWEEN ? AND ?
           AND block_number <= {CONFIRMED_MAX}
         ORDER BY block_number, log_index"
    );
    select_logs(
        conn,
        &sql,
        vec![
            sig.to_string(),
            address.to_string(),
            ((word_index + 1) * 64).to_string(),
            (word_index * 64 + 1).to_string(),
            bytes_to_hex(&min.0),
            bytes_to_hex(&max.0),
            confs_i64(confirmations).to_string(),
        ],
    )
    .await
}

pub async fn logs_by_word_min(
    conn: &mut SqliteConnection,
    sig: Hash,
    address: Address,
    word_index: usize,
    min: Hash,
    confirmations: u64,
) -> Result<Vec<LogRecord>, PollerError> {
    let sql = format!(
        "SELECT * FROM logs
         WHERE event_sig = ? AND address = ?
           AND length(data) >= CAST(? AS INTEGER)
           AND substr(data, ?, 64) >= ?
           AND block_number <= {CONFIRMED_MAX}
         ORDER BY block_number, log_index"
    );
    select_logs(
        conn,
        &sql,
        vec![
            sig.to_string(),
            address.to_string(),
            ((word_index + 1) * 64).to_string(),
            (word_index * 64 + 1).to_string(),
            bytes_to_hex(&min.0),
            confs_i64(confirmations).to_string(),
        ],
    )
    .await
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn insert_block_range(
        &self,
        blocks: &[BlockRecord],
        logs: &[LogRecord],
    ) -> Result<(), PollerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        insert_block_range(&mut tx, blocks, logs).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!(blocks = blocks.len(), logs = logs.len(), "range persisted");
        Ok(())
    }

    async fn delete_from(&self, height: i64) -> Result<(), PollerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        delete_from(&mut tx, height).await?;
        tx.commit().await.map_err(storage_err)?;
        debug!(height, "truncated blocks and logs");
        Ok(())
    }

    async fn prune_older_than(&self, cutoff_timestamp: i64) -> Result<u64, PollerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let pruned = prune_older_than(&mut tx, cutoff_timestamp).await?;
        tx.commit().await.map_err(storage_err)?;
        Ok(pruned)
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        latest_block(&mut conn).await
    }

    async fn block_by_number(&self, number: i64) -> Result<Option<BlockRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        block_by_number(&mut conn, number).await
    }

    async fn blocks_in_range(&self, numbers: &[i64]) -> Result<Vec<BlockRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        blocks_in_range(&mut conn, numbers).await
    }

    async fn logs_by_range(
        &self,
        start: i64,
        end: i64,
        sig: Hash,
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        logs_by_range(&mut conn, start, end, sig, address).await
    }

    async fn logs_with_sigs(
        &self,
        start: i64,
        end: i64,
        sigs: &[Hash],
        address: Address,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        logs_with_sigs(&mut conn, start, end, sigs, address).await
    }

    async fn latest_log_with_confs(
        &self,
        sig: Hash,
        address: Address,
        confirmations: u64,
    ) -> Result<Option<LogRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        latest_log_with_confs(&mut conn, sig, address, confirmations).await
    }

    async fn latest_logs_with_confs(
        &self,
        from_block: i64,
        sigs: &[Hash],
        addresses: &[Address],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        latest_logs_with_confs(&mut conn, from_block, sigs, addresses, confirmations).await
    }

    async fn logs_by_topic_values(
        &self,
        sig: Hash,
        address: Address,
        topic_index: usize,
        values: &[Hash],
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        logs_by_topic_values(&mut conn, sig, address, topic_index, values, confirmations).await
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
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        logs_by_topic_range(&mut conn, sig, address, topic_index, min, max, confirmations).await
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
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        logs_by_word_range(&mut conn, sig, address, word_index, min, max, confirmations).await
    }

    async fn logs_by_word_min(
        &self,
        sig: Hash,
        address: Address,
        word_index: usize,
        min: Hash,
        confirmations: u64,
    ) -> Result<Vec<LogRecord>, PollerError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        logs_by_word_min(&mut conn, sig, address, word_index, min, confirmations).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: i64, hash: u64, parent: u64) -> BlockRecord {
        BlockRecord {
            number,
            hash: Hash::from_u64(hash),
            parent_hash: Hash::from_u64(parent),
            timestamp: number * 12,
        }
    }

    fn log(block_number: i64, log_index: i64, addr: u64, sig: u64) -> LogRecord {
        LogRecord {
            block_number,
            block_hash: Hash::from_u64(block_number as u64),
            tx_hash: Hash::from_u64(0x1000 + log_index as u64),
            log_index,
            address: Address::from_u64(addr),
            event_sig: Hash::from_u64(sig),
            topics: vec![Hash::from_u64(sig)],
            data: vec![],
        }
    }

    async fn seeded() -> SqliteLogStore {
        let store = SqliteLogStore::in_memory().await.unwrap();
        let blocks: Vec<BlockRecord> =
            (100..=105).map(|n| block(n, n as u64, n as u64 - 1)).collect();
        let logs = vec![log(101, 0, 0xAA, 0x01), log(104, 0, 0xAA, 0x01)];
        store.insert_block_range(&blocks, &logs).await.unwrap();
        store
    }

    #[tokio::test]
    async fn block_roundtrip() {
        let store = seeded().await;
        let latest = store.latest_block().await.unwrap().unwrap();
        assert_eq!(latest.number, 105);
        assert_eq!(latest.hash, Hash::from_u64(105));

        let b = store.block_by_number(103).await.unwrap().unwrap();
        assert_eq!(b.parent_hash, Hash::from_u64(102));
        assert!(store.block_by_number(999).await.unwrap().is_none());

        let got = store.blocks_in_range(&[100, 104, 999]).await.unwrap();
        let numbers: Vec<i64> = got.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![100, 104]);
    }

    #[tokio::test]
    async fn log_roundtrip_preserves_fields() {
        let store = SqliteLogStore::in_memory().await.unwrap();
        let mut l = log(7, 3, 0xAA, 0x01);
        l.topics.push(Hash::from_u64(0xbeef));
        l.data = vec![1, 2, 3, 0xff];
        store
            .insert_block_range(&[block(7, 7, 6)], &[l.clone()])
            .await
            .unwrap();

        let got = store
            .logs_by_range(0, 10, Hash::from_u64(0x01), Address::from_u64(0xAA))
            .await
            .unwrap();
        assert_eq!(got, vec![l]);
    }

    #[tokio::test]
    async fn range_query_ordering_and_cutoff() {
        let store = seeded().await;
        let sig = Hash::from_u64(0x01);
        let addr = Address::from_u64(0xAA);

        let logs = store.logs_by_range(100, 105, sig, addr).await.unwrap();
        let numbers: Vec<i64> = logs.iter().map(|l| l.block_number).collect();
        assert_eq!(numbers, vec![101, 104]);

        // Head 105, confs 2 → cutoff 103 → the log at 101 is the latest.
        let latest = store.latest_log_with_confs(sig, addr, 2).await.unwrap().unwrap();
        assert_eq!(latest.block_number, 101);
        let latest = store.latest_log_with_confs(sig, addr, 0).await.unwrap().unwrap();
        assert_eq!(latest.block_number, 104);
        assert!(store.latest_log_with_confs(sig, addr, 10).await.unwrap().is_none());

        // A depth past i64 clamps the cutoff; it must never wrap above head.
        assert!(store
            .latest_log_with_confs(sig, addr, u64::MAX)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .latest_logs_with_confs(0, &[sig], &[addr], u64::MAX)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn caller_transaction_scopes_writes() {
        let store = seeded().await;

        // Rolled-back caller transaction leaves nothing behind.
        let mut tx = store.pool().begin().await.unwrap();
        insert_block_range(
            &mut tx,
            &[block(106, 106, 105)],
            &[log(106, 0, 0xAA, 0x01)],
        )
        .await
        .unwrap();
        delete_from(&mut tx, 104).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 105);
        let logs = store
            .logs_by_range(100, 110, Hash::from_u64(0x01), Address::from_u64(0xAA))
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);

        // Committed caller transaction applies both statements atomically.
        let mut tx = store.pool().begin().await.unwrap();
        delete_from(&mut tx, 104).await.unwrap();
        insert_block_range(
            &mut tx,
            &[block(104, 0x9104, 103)],
            &[log(104, 0, 0xAA, 0x01)],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 104);
        assert_eq!(
            store.block_by_number(104).await.unwrap().unwrap().hash,
            Hash::from_u64(0x9104)
        );
    }

    #[tokio::test]
    async fn scoped_reads_compose_with_caller_connection() {
        let store = seeded().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let latest = latest_block(&mut conn).await.unwrap().unwrap();
        assert_eq!(latest.number, 105);
        let logs = logs_by_range(
            &mut conn,
            100,
            105,
            Hash::from_u64(0x01),
            Address::from_u64(0xAA),
        )
        .await
        .unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn latest_logs_per_pair() {
        let store = SqliteLogStore::in_memory().await.unwrap();
        let blocks: Vec<BlockRecord> = (1..=5).map(|n| block(n, n as u64, n as u64 - 1)).collect();
        let logs = vec![
            log(1, 0, 0xAA, 0x01),
            log(3, 0, 0xAA, 0x01),
            log(3, 1, 0xAA, 0x01), // same block, higher index — this one wins
            log(2, 0, 0xBB, 0x02),
        ];
        store.insert_block_range(&blocks, &logs).await.unwrap();

        let got = store
            .latest_logs_with_confs(
                0,
                &[Hash::from_u64(0x01), Hash::from_u64(0x02)],
                &[Address::from_u64(0xAA), Address::from_u64(0xBB)],
                0,
            )
            .await
            .unwrap();
        let picks: Vec<(i64, i64)> = got.iter().map(|l| (l.block_number, l.log_index)).collect();
        assert_eq!(picks, vec![(2, 0), (3, 1)]);
    }

    #[tokio::test]
    async fn topic_queries() {
        let store = SqliteLogStore::in_memory().await.unwrap();
        let blocks: Vec<BlockRecord> = (1..=3).map(|n| block(n, n as u64, n as u64 - 1)).collect();
        let mut logs = Vec::new();
        for (n, value) in [(1i64, 100u64), (2, 200), (3, 300)] {
            let mut l = log(n, 0, 0xAA, 0x01);
            l.topics.push(Hash::from_u64(value));
            logs.push(l);
        }
        store.insert_block_range(&blocks, &logs).await.unwrap();

        let sig = Hash::from_u64(0x01);
        let addr = Address::from_u64(0xAA);

        let hits = store
            .logs_by_topic_values(sig, addr, 1, &[Hash::from_u64(200)], 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].block_number, 2);

        let hits = store
            .logs_by_topic_range(sig, addr, 1, Hash::from_u64(150), Hash::from_u64(350), 0)
            .await
            .unwrap();
        let numbers: Vec<i64> = hits.iter().map(|l| l.block_number).collect();
        assert_eq!(numbers, vec![2, 3]);

        // Unpopulated topic column matches nothing.
        assert!(store
            .logs_by_topic_values(sig, addr, 3, &[Hash::from_u64(200)], 0)
            .await
            .unwrap()
            .is_empty());

        // Topic index 0 is the signature, not addressable here.
        assert!(store
            .logs_by_topic_values(sig, addr, 0, &[Hash::from_u64(200)], 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn data_word_queries() {
        let store = SqliteLogStore::in_memory().await.unwrap();
        let blocks: Vec<BlockRecord> = (1..=3).map(|n| block(n, n as u64, n as u64 - 1)).collect();
        let mut logs = Vec::new();
        for (n, value) in [(1i64, 10u64), (2, 20), (3, 30)] {
            let mut l = log(n, 0, 0xAA, 0x01);
            // Two words: a constant marker, then the interesting value.
            l.data = [Hash::from_u64(0xdead).0, Hash::from_u64(value).0].concat();
            logs.push(l);
        }
        store.insert_block_range(&blocks, &logs).await.unwrap();

        let sig = Hash::from_u64(0x01);
        let addr = Address::from_u64(0xAA);

        let hits = store
            .logs_by_word_range(sig, addr, 1, Hash::from_u64(15), Hash::from_u64(25), 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].block_number, 2);

        let hits = store
            .logs_by_word_min(sig, addr, 1, Hash::from_u64(20), 0)
            .await
            .unwrap();
        let numbers: Vec<i64> = hits.iter().map(|l| l.block_number).collect();
        assert_eq!(numbers, vec![2, 3]);

        // Word index past the payload → empty.
        assert!(store
            .logs_by_word_min(sig, addr, 2, Hash::from_u64(0), 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_from_cascades() {
        let store = seeded().await;
        store.delete_from(103).await.unwrap();

        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 102);
        let logs = store
            .logs_by_range(100, 105, Hash::from_u64(0x01), Address::from_u64(0xAA))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 101);
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_log_identity() {
        let store = seeded().await;
        let blocks: Vec<BlockRecord> =
            (100..=105).map(|n| block(n, n as u64, n as u64 - 1)).collect();
        let logs = vec![log(101, 0, 0xAA, 0x01), log(104, 0, 0xAA, 0x01)];
        store.insert_block_range(&blocks, &logs).await.unwrap();

        let got = store
            .logs_by_range(100, 105, Hash::from_u64(0x01), Address::from_u64(0xAA))
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn prune_removes_old_blocks_and_logs() {
        let store = seeded().await; // timestamps are number * 12
        let pruned = store.prune_older_than(102 * 12).await.unwrap();
        assert_eq!(pruned, 2);
        let logs = store
            .logs_by_range(100, 105, Hash::from_u64(0x01), Address::from_u64(0xAA))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 104);
    }
}
