//! Process-wide shared state.
//!
//! One read/write lock guards the current leaseholder id and the
//! holder-count cache (writers: the lease ticker and the count refresher;
//! readers: every write-path leadership check and the read API). The sync
//! cursor is a plain atomic: producers and the follower refresher store,
//! everyone loads, no compare-and-swap needed.

use crate::config::IndexerConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct SharedState {
    leader_id: u32,
    holder_counts: HashMap<String, i64>,
}

/// Shared context of one indexer process; lifetime = process lifetime.
pub struct IndexerContext {
    pub config: Arc<IndexerConfig>,
    /// This process's persisted identity.
    pub node_id: u32,
    shared: RwLock<SharedState>,
    cursor: AtomicU32,
}

impl IndexerContext {
    pub fn new(config: Arc<IndexerConfig>, node_id: u32) -> Self {
        Self {
            config,
            node_id,
            shared: RwLock::new(SharedState::default()),
            cursor: AtomicU32::new(0),
        }
    }

    /// Node id currently holding the lease, as last observed.
    pub fn leader_id(&self) -> u32 {
        self.shared.read().leader_id
    }

    pub fn set_leader_id(&self, node_id: u32) {
        self.shared.write().leader_id = node_id;
    }

    /// Whether this process believes it holds the lease.
    pub fn is_leader(&self) -> bool {
        self.leader_id() == self.node_id
    }

    /// Cached count of positive-balance holders of `contract`.
    pub fn holder_count(&self, contract: &str) -> i64 {
        self.shared
            .read()
            .holder_counts
            .get(contract)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_holder_counts(&self, counts: HashMap<String, i64>) {
        self.shared.write().holder_counts = counts;
    }

    /// Highest block height handed to the consumer.
    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn set_cursor(&self, height: u32) {
        self.cursor.store(height, Ordering::SeqCst);
    }
}
