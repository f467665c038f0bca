//! Fungible-asset indexer for a public blockchain.
//!
//! A worker polls the chain for new blocks, extracts transfer events from
//! each block's smart-contract notifications and maintains a materialized
//! view in PostgreSQL: a per-transaction event log, per-(holder, contract)
//! balances and transaction counts, and derived per-contract holder
//! counts. A read API answers asset metadata, holder-distribution and
//! balance queries.
//!
//! # Architecture
//!
//! 1. **Leader lease**: instances elect a single writer through a
//!    heartbeat row; everyone else stays a warm follower.
//! 2. **Producer**: the leader walks the chain from its cursor to the
//!    tip and queues raw block events.
//! 3. **Decoder**: contract notifications become uniform transfer
//!    records (native, generic-token and one quirk convention).
//! 4. **Consumer**: batches are applied idempotently, so replaying a
//!    block after a crash or failover is a no-op on the store.
//! 5. **Read façade**: an HTTP surface serves holder and balance
//!    queries from the store and an in-memory holder-count cache.

// Public API exports
pub use chain::{AssetInfo, ChainRpc, HttpChainRpc, Notification, TxEvent};
pub use config::{ContractKind, IndexerConfig, ZERO_ADDRESS};
pub use crate::core::context::IndexerContext;
pub use crate::core::decoder::{EventDecoder, TransferRecord};
pub use crate::core::indexer::AssetIndexer;
pub use crate::core::lease::{LeaseKeeper, HEARTBEAT_MODULE};
pub use crate::core::sync::{BlockEvents, SyncPipeline, SYNC_QUEUE_CAP};
pub use storage::{AssetHolder, Heartbeat, Storage, StorageBackend, TxEventRow};
pub use utils::error::{IndexerError, Result};

// Module declarations
pub mod api;
pub mod chain;
pub mod config;
pub mod core;
pub mod identity;
pub mod storage;
pub mod telemetry;
pub mod utils;
