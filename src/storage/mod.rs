//! Relational storage for the indexer.
//!
//! [`StorageBackend`] is the seam the pipeline and the lease program
//! against; [`Storage`] is the PostgreSQL implementation on a sqlx pool.
//! All balance/transaction columns are BIGINT; u64 domain values are
//! narrowed at the SQL boundary.

use crate::config::IndexerConfig;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// One row of the per-transaction event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEventRow {
    pub tx_hash: String,
    pub height: u32,
    pub state: i32,
    pub gas_consumed: u64,
    /// JSON array of `[name, from, to, amount]` tuples.
    pub notify: String,
}

/// Materialized balance of one (address, contract) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetHolder {
    pub address: String,
    pub contract: String,
    pub balance: u64,
    /// Count of distinct transactions this pair was a side of.
    pub transactions: u64,
}

/// Single-writer lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub module: String,
    pub node_id: u32,
}

/// Abstract interface over the relational store.
///
/// Every call is synchronous from the caller's point of view and may fail
/// with a retryable I/O error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Creates the schema if absent.
    async fn init_schema(&self) -> Result<()>;

    /// Applies a batch atomically: event rows are inserted only when their
    /// `tx_hash` is new; holder rows are upserted with absolute values.
    async fn apply_batch(&self, tx_events: &[TxEventRow], holders: &[AssetHolder]) -> Result<()>;

    /// Which of `hashes` already have an event row.
    async fn existing_tx_hashes(&self, hashes: &[String]) -> Result<HashSet<String>>;

    /// Current holder rows for the given (address, contract) keys;
    /// missing keys are absent from the result.
    async fn holders_by_key(
        &self,
        keys: &[(String, String)],
    ) -> Result<HashMap<(String, String), AssetHolder>>;

    /// Holder listing ordered by balance descending, then address
    /// ascending. Empty `address` pages the top holders of `contract`;
    /// non-empty `address` returns that address's rows, across all
    /// contracts when `contract` is empty, unbounded when `count == 0`.
    async fn query_holders(
        &self,
        from: u32,
        count: u32,
        address: &str,
        contract: &str,
    ) -> Result<Vec<AssetHolder>>;

    /// Count of holders with a positive balance, grouped by contract.
    async fn holder_counts(&self) -> Result<HashMap<String, i64>>;

    /// Highest block height with an applied event row, 0 when empty.
    async fn max_applied_height(&self) -> Result<u32>;

    /// Whether block 0 has been applied.
    async fn is_genesis_applied(&self) -> Result<bool>;

    /// Reads the heartbeat row of `module`.
    async fn heartbeat(&self, module: &str) -> Result<Option<Heartbeat>>;

    /// Inserts a fresh heartbeat row.
    async fn insert_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()>;

    /// Bumps `last_update`, but only while `node_id` still owns the row.
    /// Returns `false` when ownership was lost.
    async fn update_heartbeat(&self, module: &str, node_id: u32) -> Result<bool>;

    /// Atomically takes over a stale lease: succeeds only while the row
    /// still belongs to `expected_prev` and is older than `timeout_secs`.
    async fn reset_heartbeat(
        &self,
        module: &str,
        new_node_id: u32,
        expected_prev: u32,
        timeout_secs: u32,
    ) -> Result<bool>;

    /// Returns the current owner's node id when the row is older than
    /// `timeout_secs`, or 0 while the leader is alive.
    async fn check_heartbeat_timeout(&self, module: &str, timeout_secs: u32) -> Result<u32>;
}

/// PostgreSQL storage on a connection pool.
pub struct Storage {
    pool: PgPool,
}

const DEFAULT_MAX_CONNS: u32 = 5;

impl Storage {
    /// Connects a pool using the `db_*` settings of `config`.
    pub async fn connect(config: &IndexerConfig) -> Result<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(if config.db_max_conns == 0 {
                DEFAULT_MAX_CONNS
            } else {
                config.db_max_conns
            })
            .min_connections(config.db_min_conns)
            .acquire_timeout(Duration::from_secs(3));
        if config.db_conn_lifetime > 0 {
            options = options.max_lifetime(Duration::from_secs(u64::from(config.db_conn_lifetime)));
        }
        let pool = options.connect(&config.db_url).await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn as_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn holder_from_row(row: (String, String, i64, i64)) -> AssetHolder {
    AssetHolder {
        address: row.0,
        contract: row.1,
        balance: row.2.try_into().unwrap_or(0),
        transactions: row.3.try_into().unwrap_or(0),
    }
}

#[async_trait]
impl StorageBackend for Storage {
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tx_events (
                tx_hash TEXT PRIMARY KEY,
                height BIGINT NOT NULL,
                state INT NOT NULL,
                gas_consumed BIGINT NOT NULL,
                notify TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_tx_events_height
            ON tx_events(height)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS asset_holders (
                address TEXT NOT NULL,
                contract TEXT NOT NULL,
                balance BIGINT NOT NULL DEFAULT 0,
                transactions BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (address, contract)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_asset_holders_contract_balance
            ON asset_holders(contract, balance DESC)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS heartbeats (
                module TEXT PRIMARY KEY,
                node_id BIGINT NOT NULL,
                last_update TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_batch(&self, tx_events: &[TxEventRow], holders: &[AssetHolder]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for event in tx_events {
            sqlx::query(
                r"
                INSERT INTO tx_events (tx_hash, height, state, gas_consumed, notify)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tx_hash) DO NOTHING
                ",
            )
            .bind(&event.tx_hash)
            .bind(i64::from(event.height))
            .bind(event.state)
            .bind(as_bigint(event.gas_consumed))
            .bind(&event.notify)
            .execute(&mut *tx)
            .await?;
        }

        for holder in holders {
            sqlx::query(
                r"
                INSERT INTO asset_holders (address, contract, balance, transactions)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (address, contract)
                DO UPDATE SET balance = $3, transactions = $4
                ",
            )
            .bind(&holder.address)
            .bind(&holder.contract)
            .bind(as_bigint(holder.balance))
            .bind(as_bigint(holder.transactions))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn existing_tx_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT tx_hash FROM tx_events WHERE tx_hash = ANY($1)")
                .bind(hashes)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn holders_by_key(
        &self,
        keys: &[(String, String)],
    ) -> Result<HashMap<(String, String), AssetHolder>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let addresses: Vec<String> = keys.iter().map(|k| k.0.clone()).collect();
        let contracts: Vec<String> = keys.iter().map(|k| k.1.clone()).collect();
        let rows: Vec<(String, String, i64, i64)> = sqlx::query_as(
            r"
            SELECT h.address, h.contract, h.balance, h.transactions
            FROM asset_holders h
            JOIN UNNEST($1::text[], $2::text[]) AS k(address, contract)
              ON h.address = k.address AND h.contract = k.contract
            ",
        )
        .bind(&addresses)
        .bind(&contracts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(holder_from_row)
            .map(|h| ((h.address.clone(), h.contract.clone()), h))
            .collect())
    }

    async fn query_holders(
        &self,
        from: u32,
        count: u32,
        address: &str,
        contract: &str,
    ) -> Result<Vec<AssetHolder>> {
        let rows: Vec<(String, String, i64, i64)> = if address.is_empty() {
            sqlx::query_as(
                r"
                SELECT address, contract, balance, transactions
                FROM asset_holders
                WHERE contract = $1
                ORDER BY balance DESC, address ASC
                OFFSET $2 LIMIT $3
                ",
            )
            .bind(contract)
            .bind(i64::from(from))
            .bind(i64::from(count))
            .fetch_all(&self.pool)
            .await?
        } else if contract.is_empty() {
            sqlx::query_as(
                r"
                SELECT address, contract, balance, transactions
                FROM asset_holders
                WHERE address = $1
                ORDER BY balance DESC, address ASC
                ",
            )
            .bind(address)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r"
                SELECT address, contract, balance, transactions
                FROM asset_holders
                WHERE address = $1 AND contract = $2
                ORDER BY balance DESC, address ASC
                ",
            )
            .bind(address)
            .bind(contract)
            .fetch_all(&self.pool)
            .await?
        };

        let mut holders: Vec<AssetHolder> = rows.into_iter().map(holder_from_row).collect();
        // An address query with count == 0 is unbounded.
        if !address.is_empty() && count > 0 {
            holders.truncate(count as usize);
        }
        Ok(holders)
    }

    async fn holder_counts(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT contract, COUNT(*)
            FROM asset_holders
            WHERE balance > 0
            GROUP BY contract
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn max_applied_height(&self) -> Result<u32> {
        let height: Option<i64> = sqlx::query_scalar("SELECT MAX(height) FROM tx_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(height.and_then(|h| u32::try_from(h).ok()).unwrap_or(0))
    }

    async fn is_genesis_applied(&self) -> Result<bool> {
        let applied: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tx_events WHERE height = 0)")
                .fetch_one(&self.pool)
                .await?;
        Ok(applied)
    }

    async fn heartbeat(&self, module: &str) -> Result<Option<Heartbeat>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT module, node_id FROM heartbeats WHERE module = $1")
                .bind(module)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(module, node_id)| Heartbeat {
            module,
            node_id: node_id.try_into().unwrap_or(0),
        }))
    }

    async fn insert_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO heartbeats (module, node_id, last_update)
            VALUES ($1, $2, NOW())
            ON CONFLICT (module) DO NOTHING
            ",
        )
        .bind(&heartbeat.module)
        .bind(i64::from(heartbeat.node_id))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_heartbeat(&self, module: &str, node_id: u32) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE heartbeats SET last_update = NOW()
            WHERE module = $1 AND node_id = $2
            ",
        )
        .bind(module)
        .bind(i64::from(node_id))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_heartbeat(
        &self,
        module: &str,
        new_node_id: u32,
        expected_prev: u32,
        timeout_secs: u32,
    ) -> Result<bool> {
        // Row-level CAS: previous owner and staleness are both part of
        // the WHERE clause, so two racing claimants cannot both win.
        let result = sqlx::query(
            r"
            UPDATE heartbeats SET node_id = $2, last_update = NOW()
            WHERE module = $1
              AND node_id = $3
              AND last_update < NOW() - make_interval(secs => $4)
            ",
        )
        .bind(module)
        .bind(i64::from(new_node_id))
        .bind(i64::from(expected_prev))
        .bind(f64::from(timeout_secs))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn check_heartbeat_timeout(&self, module: &str, timeout_secs: u32) -> Result<u32> {
        let node_id: Option<i64> = sqlx::query_scalar(
            r"
            SELECT node_id FROM heartbeats
            WHERE module = $1
              AND last_update < NOW() - make_interval(secs => $2)
            ",
        )
        .bind(module)
        .bind(f64::from(timeout_secs))
        .fetch_optional(&self.pool)
        .await?;
        Ok(node_id.and_then(|id| u32::try_from(id).ok()).unwrap_or(0))
    }
}
