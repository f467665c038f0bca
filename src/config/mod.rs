//! Configuration management for the indexer.
//!
//! The configuration is a JSON file deserialized with serde. Interval and
//! timeout knobs treat `0` as "use the default", so a sparse config file
//! keeps working across new releases.

use crate::utils::error::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Well-known identifier of the native coin contract.
pub const NATIVE_COIN_CONTRACT: &str = "0100000000000000000000000000000000000000";
/// Well-known identifier of the native gas contract.
pub const NATIVE_GAS_CONTRACT: &str = "0200000000000000000000000000000000000000";

/// Reserved mint/burn sentinel; never stored as a holder.
pub const ZERO_ADDRESS: &str = "0000000000000000000000000000000000000000";

const DEFAULT_HEARTBEAT_UPDATE_INTERVAL: u32 = 5;
const DEFAULT_HEARTBEAT_TIMEOUT: u32 = 30;
const DEFAULT_HOLDER_COUNT_UPDATE_INTERVAL: u32 = 600;
const DEFAULT_SYNCED_BLOCK_HEIGHT_INTERVAL: u32 = 10;
const DEFAULT_DB_BATCH_SIZE: u32 = 100;
const DEFAULT_DB_BATCH_TIME: u32 = 5;

/// Kind of a token contract, determined by its identifier.
///
/// The two native kinds are matched exactly against well-known sentinel
/// identifiers; every other monitored contract is a generic [`Token`].
///
/// [`Token`]: ContractKind::Token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    NativeCoin,
    NativeGas,
    /// A monitored contract implementing the generic token standard.
    Token,
    /// Not in the monitored set; invisible to the indexer.
    Unknown,
}

/// Indexer configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IndexerConfig {
    /// Postgres connection URL.
    pub db_url: String,
    /// Max connections in the pool.
    pub db_max_conns: u32,
    /// Idle connections the pool keeps open.
    pub db_min_conns: u32,
    /// Max lifetime of a pooled connection, seconds.
    pub db_conn_lifetime: u32,
    /// Chain JSON-RPC endpoint.
    pub rpc_address: String,
    /// Configured floor for the sync cursor.
    pub block_height: u32,
    /// Bind port for the HTTP read surface.
    pub http_port: u16,
    /// Flush threshold for the batched apply, in transfers.
    pub db_batch_size: u32,
    /// Flush period for the batched apply, seconds.
    pub db_batch_time: u32,
    /// Upper bound on the `count` parameter of holder queries.
    pub max_query_page_size: u32,
    /// Monitored contract identifiers (lowercase hex).
    pub contracts: Vec<String>,
    /// Heartbeat refresh period, seconds.
    pub heartbeat_update_interval: u32,
    /// Staleness bound after which a leader loses the lease, seconds.
    pub heartbeat_timeout: u32,
    /// Holder-count cache refresh period, seconds.
    pub holder_count_update_interval: u32,
    /// Follower cursor refresh period, seconds.
    pub synced_block_height_interval: u32,
}

impl IndexerConfig {
    /// Loads and deserializes the configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        serde_json::from_slice(&data).map_err(|e| {
            IndexerError::Config(format!(
                "invalid config file {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    /// Returns `true` if `contract` is in the monitored set.
    pub fn is_monitored(&self, contract: &str) -> bool {
        self.contracts.iter().any(|c| c == contract)
    }

    /// Classifies a contract identifier.
    pub fn kind_of(&self, contract: &str) -> ContractKind {
        if contract == NATIVE_COIN_CONTRACT {
            ContractKind::NativeCoin
        } else if contract == NATIVE_GAS_CONTRACT {
            ContractKind::NativeGas
        } else if self.is_monitored(contract) {
            ContractKind::Token
        } else {
            ContractKind::Unknown
        }
    }

    pub fn heartbeat_update_interval(&self) -> u32 {
        default_if_zero(self.heartbeat_update_interval, DEFAULT_HEARTBEAT_UPDATE_INTERVAL)
    }

    pub fn heartbeat_timeout(&self) -> u32 {
        default_if_zero(self.heartbeat_timeout, DEFAULT_HEARTBEAT_TIMEOUT)
    }

    pub fn holder_count_update_interval(&self) -> u32 {
        default_if_zero(
            self.holder_count_update_interval,
            DEFAULT_HOLDER_COUNT_UPDATE_INTERVAL,
        )
    }

    pub fn synced_block_height_interval(&self) -> u32 {
        default_if_zero(
            self.synced_block_height_interval,
            DEFAULT_SYNCED_BLOCK_HEIGHT_INTERVAL,
        )
    }

    pub fn db_batch_size(&self) -> u32 {
        default_if_zero(self.db_batch_size, DEFAULT_DB_BATCH_SIZE)
    }

    pub fn db_batch_time(&self) -> u32 {
        default_if_zero(self.db_batch_time, DEFAULT_DB_BATCH_TIME)
    }
}

fn default_if_zero(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}
