//! Indexer orchestration.
//!
//! [`AssetIndexer`] wires the lease keeper, the refresh timers and the
//! sync pipeline over one shared context and one cancellation token.
//! Every long-lived task is spawned from [`AssetIndexer::start`]; a demoted
//! instance keeps all of them running as a warm follower.

use crate::chain::ChainRpc;
use crate::core::context::IndexerContext;
use crate::core::lease::LeaseKeeper;
use crate::core::sync::{SyncPipeline, SYNC_QUEUE_CAP};
use crate::storage::StorageBackend;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The indexing service: one instance per process.
pub struct AssetIndexer {
    ctx: Arc<IndexerContext>,
    storage: Arc<dyn StorageBackend>,
    chain: Arc<dyn ChainRpc>,
    token: CancellationToken,
}

impl AssetIndexer {
    pub fn new(
        ctx: Arc<IndexerContext>,
        storage: Arc<dyn StorageBackend>,
        chain: Arc<dyn ChainRpc>,
    ) -> Self {
        Self {
            ctx,
            storage,
            chain,
            token: CancellationToken::new(),
        }
    }

    /// Shared context (read by the HTTP layer).
    pub fn context(&self) -> Arc<IndexerContext> {
        self.ctx.clone()
    }

    /// Token cancelled on shutdown; child tasks and the HTTP server
    /// select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Brings the instance up: lease, caches, cursor, genesis, pipeline.
    ///
    /// Returns once every background task is spawned. Errors here are
    /// startup errors; after this point all failures are absorbed and
    /// retried inside the tasks.
    pub async fn start(&self) -> Result<()> {
        let lease = Arc::new(LeaseKeeper::new(self.ctx.clone(), self.storage.clone()));
        lease.init().await?;

        refresh_holder_counts(&self.ctx, self.storage.as_ref()).await?;
        for contract in &self.ctx.config.contracts {
            info!(contract = %contract, holders = self.ctx.holder_count(contract), "holder count");
        }

        tokio::spawn({
            let lease = lease.clone();
            let token = self.token.clone();
            async move { lease.run(token).await }
        });
        tokio::spawn(update_info_loop(
            self.ctx.clone(),
            self.storage.clone(),
            self.token.clone(),
        ));

        refresh_synced_height(&self.ctx, self.storage.as_ref()).await?;

        let pipeline = Arc::new(SyncPipeline::new(
            self.ctx.clone(),
            self.storage.clone(),
            self.chain.clone(),
        ));
        pipeline.bootstrap_genesis().await?;

        let (queue_tx, queue_rx) = mpsc::channel(SYNC_QUEUE_CAP);
        tokio::spawn({
            let pipeline = pipeline.clone();
            let token = self.token.clone();
            async move { pipeline.run_producer(queue_tx, token).await }
        });
        tokio::spawn({
            let pipeline = pipeline.clone();
            let token = self.token.clone();
            async move { pipeline.run_consumer(queue_rx, token).await }
        });

        info!(node_id = self.ctx.node_id, "indexer started");
        Ok(())
    }

    /// Signals every task to terminate.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

/// Periodic refresh of the follower cursor and the holder-count cache.
async fn update_info_loop(
    ctx: Arc<IndexerContext>,
    storage: Arc<dyn StorageBackend>,
    token: CancellationToken,
) {
    let mut height_timer = interval(Duration::from_secs(u64::from(
        ctx.config.synced_block_height_interval(),
    )));
    let mut counts_timer = interval(Duration::from_secs(u64::from(
        ctx.config.holder_count_update_interval(),
    )));
    height_timer.tick().await;
    counts_timer.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = height_timer.tick() => {
                // Leaders track the cursor in memory; only followers
                // shadow it from the store.
                if !ctx.is_leader() {
                    if let Err(e) = refresh_synced_height(&ctx, storage.as_ref()).await {
                        error!(error = %e, "synced height refresh failed");
                    }
                }
            }
            _ = counts_timer.tick() => {
                if let Err(e) = refresh_holder_counts(&ctx, storage.as_ref()).await {
                    error!(error = %e, "holder count refresh failed");
                }
            }
        }
    }
}

/// Sets the cursor to `max(applied_height) − 1` (one-block safety margin,
/// so a partially applied tip is re-delivered) or the configured floor,
/// whichever is higher.
pub(crate) async fn refresh_synced_height(
    ctx: &IndexerContext,
    storage: &dyn StorageBackend,
) -> Result<()> {
    let mut height = storage.max_applied_height().await?;
    if height > 0 {
        height -= 1;
    }
    if ctx.config.block_height > height {
        height = ctx.config.block_height;
    }
    ctx.set_cursor(height);
    info!(height, "synced block height");
    Ok(())
}

/// Swaps the in-memory holder-count cache from the store.
pub(crate) async fn refresh_holder_counts(
    ctx: &IndexerContext,
    storage: &dyn StorageBackend,
) -> Result<()> {
    let counts = storage.holder_counts().await?;
    ctx.set_holder_counts(counts);
    Ok(())
}
