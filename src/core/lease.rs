//! Single-writer election over a heartbeat row.
//!
//! Every instance ticks the same state machine: the current owner keeps
//! refreshing its row and demotes itself the moment a refresh is refused;
//! followers watch for staleness and try to take the lease over with a
//! compare-and-swap keyed on the previous owner. The CAS is the only
//! promotion path, so two followers racing cannot both win, and a leader
//! stalled past the timeout loses the lease without its cooperation.

use crate::core::context::IndexerContext;
use crate::storage::{Heartbeat, StorageBackend};
use crate::utils::error::{IndexerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Module name of the indexer's heartbeat row.
pub const HEARTBEAT_MODULE: &str = "asset_sync";

/// Drives the lease state machine for one process.
pub struct LeaseKeeper {
    ctx: Arc<IndexerContext>,
    storage: Arc<dyn StorageBackend>,
}

impl LeaseKeeper {
    pub fn new(ctx: Arc<IndexerContext>, storage: Arc<dyn StorageBackend>) -> Self {
        Self { ctx, storage }
    }

    /// Startup: adopt the stored leaseholder (inserting a fresh row naming
    /// this node when none exists) and run one immediate tick.
    pub async fn init(&self) -> Result<()> {
        let heartbeat = match self.storage.heartbeat(HEARTBEAT_MODULE).await? {
            Some(heartbeat) => heartbeat,
            None => {
                let fresh = Heartbeat {
                    module: HEARTBEAT_MODULE.to_string(),
                    node_id: self.ctx.node_id,
                };
                self.storage.insert_heartbeat(&fresh).await?;
                // Another instance may have raced the insert; trust the row.
                self.storage
                    .heartbeat(HEARTBEAT_MODULE)
                    .await?
                    .unwrap_or(fresh)
            }
        };
        info!(leader = heartbeat.node_id, node = self.ctx.node_id, "current leaseholder");
        self.ctx.set_leader_id(heartbeat.node_id);
        self.tick().await
    }

    /// Periodic ticker; runs until cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let period = Duration::from_secs(u64::from(self.ctx.config.heartbeat_update_interval()));
        let mut ticker = interval(period);
        ticker.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "heartbeat tick failed");
                    }
                }
            }
        }
    }

    /// One state-machine step.
    pub async fn tick(&self) -> Result<()> {
        let node_id = self.ctx.node_id;
        if self.ctx.leader_id() == node_id {
            if self.storage.update_heartbeat(HEARTBEAT_MODULE, node_id).await? {
                debug!(node_id, "lease refreshed");
                return Ok(());
            }
            // The row changed hands while we thought we owned it.
            let heartbeat = self
                .storage
                .heartbeat(HEARTBEAT_MODULE)
                .await?
                .ok_or_else(|| IndexerError::Internal("heartbeat row vanished".to_string()))?;
            self.ctx.set_leader_id(heartbeat.node_id);
            info!(node_id, new_leader = heartbeat.node_id, "demoted, lease taken over");
            return Ok(());
        }

        let timeout = self.ctx.config.heartbeat_timeout();
        let stale_id = self
            .storage
            .check_heartbeat_timeout(HEARTBEAT_MODULE, timeout)
            .await?;
        if stale_id == 0 {
            // Leader is alive.
            return Ok(());
        }
        info!(stale_leader = stale_id, "lease timed out");
        if self
            .storage
            .reset_heartbeat(HEARTBEAT_MODULE, node_id, stale_id, timeout)
            .await?
        {
            self.ctx.set_leader_id(node_id);
            info!(node_id, "promoted to leaseholder");
        }
        Ok(())
    }
}
