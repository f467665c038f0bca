//! Lease failover and cursor-recovery scenarios across multiple
//! instances sharing one store.

mod common;

use asset_indexer::config::NATIVE_COIN_CONTRACT;
use asset_indexer::{
    AssetIndexer, IndexerConfig, IndexerContext, LeaseKeeper, StorageBackend, TxEventRow,
    HEARTBEAT_MODULE,
};
use common::{MockChain, MockStorage};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

fn test_config() -> IndexerConfig {
    IndexerConfig {
        contracts: vec![NATIVE_COIN_CONTRACT.to_string()],
        ..IndexerConfig::default()
    }
}

fn tx_row(tx_hash: &str, height: u32) -> TxEventRow {
    TxEventRow {
        tx_hash: tx_hash.to_string(),
        height,
        state: 1,
        gas_consumed: 0,
        notify: "[]".to_string(),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_failover_promotes_follower_and_demotes_stale_leader() {
    let config = Arc::new(test_config());
    let storage = Arc::new(MockStorage::new());
    let backend: Arc<dyn StorageBackend> = storage.clone();

    let ctx1 = Arc::new(IndexerContext::new(config.clone(), 11));
    let ctx2 = Arc::new(IndexerContext::new(config.clone(), 22));
    let lease1 = LeaseKeeper::new(ctx1.clone(), backend.clone());
    let lease2 = LeaseKeeper::new(ctx2.clone(), backend.clone());

    // First instance claims the empty lease; the second stays a follower.
    lease1.init().await.unwrap();
    assert!(ctx1.is_leader());
    lease2.init().await.unwrap();
    assert!(!ctx2.is_leader());

    // While the leader heartbeats, follower ticks change nothing.
    lease2.tick().await.unwrap();
    assert!(!ctx2.is_leader());

    // The leader hangs past the lease timeout; the follower's next tick
    // observes the stale row and takes the lease over.
    storage.age_heartbeat(HEARTBEAT_MODULE, 31);
    lease2.tick().await.unwrap();
    assert!(ctx2.is_leader());

    // The old leader revives: its refresh is refused, it adopts the new
    // leaseholder and demotes without writing.
    lease1.tick().await.unwrap();
    assert!(!ctx1.is_leader());
    assert_eq!(ctx1.leader_id(), 22);

    let row = backend.heartbeat(HEARTBEAT_MODULE).await.unwrap().unwrap();
    assert_eq!(row.node_id, 22);
}

#[tokio::test]
async fn test_racing_claims_have_single_winner() {
    let config = Arc::new(test_config());
    let storage = Arc::new(MockStorage::new());
    let backend: Arc<dyn StorageBackend> = storage.clone();

    let ctx1 = Arc::new(IndexerContext::new(config.clone(), 11));
    let ctx2 = Arc::new(IndexerContext::new(config.clone(), 22));
    let ctx3 = Arc::new(IndexerContext::new(config.clone(), 33));
    let lease1 = LeaseKeeper::new(ctx1.clone(), backend.clone());
    let lease2 = LeaseKeeper::new(ctx2.clone(), backend.clone());
    let lease3 = LeaseKeeper::new(ctx3.clone(), backend.clone());

    lease1.init().await.unwrap();
    lease2.init().await.unwrap();
    lease3.init().await.unwrap();
    storage.age_heartbeat(HEARTBEAT_MODULE, 31);

    // Both followers observe the timeout; the compare-and-swap lets only
    // the first claim through, the second sees a fresh row again.
    lease2.tick().await.unwrap();
    lease3.tick().await.unwrap();

    assert!(ctx2.is_leader());
    assert!(!ctx3.is_leader());
    let row = backend.heartbeat(HEARTBEAT_MODULE).await.unwrap().unwrap();
    assert_eq!(row.node_id, 22);
}

#[tokio::test(start_paused = true)]
async fn test_leader_restart_resumes_below_applied_height() {
    let config = Arc::new(test_config());
    let storage = Arc::new(MockStorage::new());
    let backend: Arc<dyn StorageBackend> = storage.clone();
    let chain = Arc::new(MockChain::new());
    chain.set_tip(9);

    // State left behind by a previous run that crashed as leader.
    backend
        .apply_batch(&[tx_row("AA", 5), tx_row("BB", 9)], &[])
        .await
        .unwrap();

    let ctx = Arc::new(IndexerContext::new(config, 11));
    let indexer = AssetIndexer::new(
        ctx.clone(),
        backend.clone(),
        chain.clone(),
    );
    indexer.start().await.unwrap();

    // Fresh start claims the lease and rewinds one block below the
    // applied height, re-delivering the possibly partial tip.
    assert!(ctx.is_leader());
    assert_eq!(ctx.cursor(), 8);

    let ctx_poll = ctx.clone();
    wait_until(move || ctx_poll.cursor() == 9).await;
    indexer.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_follower_shadows_cursor_from_store() {
    let config = Arc::new(test_config());
    let storage = Arc::new(MockStorage::new());
    let backend: Arc<dyn StorageBackend> = storage.clone();
    let chain = Arc::new(MockChain::new());

    // The lease already belongs to a live node 99.
    let leader_ctx = Arc::new(IndexerContext::new(config.clone(), 99));
    LeaseKeeper::new(leader_ctx, backend.clone())
        .init()
        .await
        .unwrap();

    let ctx = Arc::new(IndexerContext::new(config, 11));
    let indexer = AssetIndexer::new(
        ctx.clone(),
        backend.clone(),
        chain.clone(),
    );
    indexer.start().await.unwrap();
    assert!(!ctx.is_leader());
    assert_eq!(ctx.cursor(), 0);

    // The leader applies new blocks; the follower's periodic refresh
    // shadows the store so a later promotion resumes near the tip.
    backend.apply_batch(&[tx_row("CC", 20)], &[]).await.unwrap();
    let ctx_poll = ctx.clone();
    wait_until(move || ctx_poll.cursor() == 19).await;
    indexer.shutdown();
}
