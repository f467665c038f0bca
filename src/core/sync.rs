//! Block-synchronisation pipeline.
//!
//! A producer task walks the chain from the cursor to the tip and feeds
//! raw block events through a bounded queue; a consumer task decodes them,
//! accumulates batch rows and applies them to storage. Backpressure is the
//! producer's non-blocking send: a full queue stops the cursor until the
//! consumer catches up. The apply step is idempotent, so a crash or a
//! failover replaying the same blocks is a no-op on the store.

use crate::chain::{ChainRpc, TxEvent};
use crate::config::ZERO_ADDRESS;
use crate::core::context::IndexerContext;
use crate::core::decoder::{notify_json, EventDecoder, TransferRecord};
use crate::storage::{AssetHolder, StorageBackend, TxEventRow};
use crate::utils::error::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Capacity of the block-event queue between producer and consumer.
pub const SYNC_QUEUE_CAP: usize = 1000;

/// One block's worth of raw events, queued for the consumer.
#[derive(Debug)]
pub struct BlockEvents {
    pub height: u32,
    pub events: Vec<TxEvent>,
}

/// Producer/consumer pair over one shared context.
pub struct SyncPipeline {
    ctx: Arc<IndexerContext>,
    storage: Arc<dyn StorageBackend>,
    chain: Arc<dyn ChainRpc>,
    decoder: EventDecoder,
}

impl SyncPipeline {
    pub fn new(
        ctx: Arc<IndexerContext>,
        storage: Arc<dyn StorageBackend>,
        chain: Arc<dyn ChainRpc>,
    ) -> Self {
        let decoder = EventDecoder::new(ctx.config.clone());
        Self {
            ctx,
            storage,
            chain,
            decoder,
        }
    }

    /// Applies block 0 as a credit-only batch when the store is empty.
    ///
    /// Genesis transfers mint balances out of nothing, so the normal debit
    /// path would reject every one of them; each receiver is seeded
    /// directly instead.
    pub async fn bootstrap_genesis(&self) -> Result<()> {
        if self.ctx.cursor() > 0 {
            return Ok(());
        }
        if self.storage.is_genesis_applied().await? {
            return Ok(());
        }
        let events = self.chain.block_events(0).await?;
        let mut rows = Vec::new();
        let mut holders = Vec::new();
        for evt in &events {
            let transfers = self.decoder.transfers_from_tx(evt);
            if transfers.is_empty() {
                continue;
            }
            for transfer in &transfers {
                holders.push(AssetHolder {
                    address: transfer.to.clone(),
                    contract: transfer.contract.clone(),
                    balance: transfer.amount,
                    transactions: 1,
                });
            }
            rows.push(TxEventRow {
                tx_hash: evt.tx_hash.clone(),
                height: 0,
                state: evt.state,
                gas_consumed: evt.gas_consumed,
                notify: notify_json(&transfers),
            });
        }
        if rows.is_empty() {
            return Ok(());
        }
        info!(transactions = rows.len(), "applying genesis block");
        self.storage.apply_batch(&rows, &holders).await
    }

    /// Producer loop: polls the tip once a second while leader.
    pub async fn run_producer(&self, queue: mpsc::Sender<BlockEvents>, token: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => self.produce_once(&queue).await,
            }
        }
    }

    async fn produce_once(&self, queue: &mpsc::Sender<BlockEvents>) {
        if !self.ctx.is_leader() {
            return;
        }
        let tip = match self.chain.current_block_height().await {
            Ok(tip) => tip,
            Err(e) => {
                error!(error = %e, "current block height fetch failed");
                return;
            }
        };
        let cursor = self.ctx.cursor();
        if tip == cursor {
            return;
        }
        debug!(from = cursor.saturating_add(1), to = tip, "syncing blocks");
        for height in cursor.saturating_add(1)..=tip {
            if !self.ctx.is_leader() {
                return;
            }
            let events = match self.chain.block_events(height).await {
                Ok(events) => events,
                Err(e) => {
                    error!(height, error = %e, "block events fetch failed");
                    return;
                }
            };
            match queue.try_send(BlockEvents { height, events }) {
                Ok(()) => self.ctx.set_cursor(height),
                // Queue full (or shutting down): retry from the same
                // cursor on the next tick.
                Err(_) => return,
            }
        }
    }

    /// Consumer loop: decodes queued blocks and applies batches, flushing
    /// on size or on the batch timer.
    pub async fn run_consumer(
        &self,
        mut queue: mpsc::Receiver<BlockEvents>,
        token: CancellationToken,
    ) {
        let batch_size = self.ctx.config.db_batch_size() as usize;
        let batch_time = Duration::from_secs(u64::from(self.ctx.config.db_batch_time()));
        let mut pending_events: Vec<TxEventRow> = Vec::new();
        let mut pending_transfers: Vec<TransferRecord> = Vec::new();
        let mut flush_timer = interval(batch_time);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_timer.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                Some(block) = queue.recv() => {
                    debug!(height = block.height, "consuming block");
                    for evt in &block.events {
                        let transfers = self.decoder.transfers_from_tx(evt);
                        if transfers.is_empty() {
                            continue;
                        }
                        pending_events.push(TxEventRow {
                            tx_hash: evt.tx_hash.clone(),
                            height: block.height,
                            state: evt.state,
                            gas_consumed: evt.gas_consumed,
                            notify: notify_json(&transfers),
                        });
                        pending_transfers.extend(transfers);

                        if pending_transfers.len() >= batch_size {
                            self.flush_with_retry(&mut pending_events, &mut pending_transfers, &token)
                                .await;
                            flush_timer.reset();
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    if !pending_events.is_empty() {
                        self.flush_with_retry(&mut pending_events, &mut pending_transfers, &token)
                            .await;
                    }
                }
            }
        }
    }

    /// Applies the accumulated batch, retrying with a one-second backoff
    /// until it succeeds or shutdown is signalled. Accumulators are cleared
    /// once the batch is either applied or discarded.
    async fn flush_with_retry(
        &self,
        pending_events: &mut Vec<TxEventRow>,
        pending_transfers: &mut Vec<TransferRecord>,
        token: &CancellationToken,
    ) {
        loop {
            match self.try_flush(pending_events, pending_transfers).await {
                Ok(()) => {
                    pending_events.clear();
                    pending_transfers.clear();
                    return;
                }
                Err(e) => {
                    error!(error = %e, "batch apply failed, retrying");
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }

    /// The idempotent write path for one batch.
    async fn try_flush(
        &self,
        pending_events: &[TxEventRow],
        pending_transfers: &[TransferRecord],
    ) -> Result<()> {
        // A demoted leader's in-flight batch is discarded, not written.
        if !self.ctx.is_leader() {
            return Ok(());
        }
        if pending_events.is_empty() {
            return Ok(());
        }

        let hashes: Vec<String> = pending_events.iter().map(|e| e.tx_hash.clone()).collect();
        let already = self.storage.existing_tx_hashes(&hashes).await?;

        let events: Vec<TxEventRow> = pending_events
            .iter()
            .filter(|e| !already.contains(&e.tx_hash))
            .cloned()
            .collect();
        if events.is_empty() {
            // Everything was applied before a crash or failover.
            return Ok(());
        }
        let transfers: Vec<TransferRecord> = pending_transfers
            .iter()
            .filter(|t| !already.contains(&t.tx_hash))
            .cloned()
            .collect();

        let keys = touched_holder_keys(&transfers);
        let mut holders = self.storage.holders_by_key(&keys).await?;
        apply_transfers(&mut holders, &transfers);

        let holder_rows: Vec<AssetHolder> = holders.into_values().collect();
        self.storage.apply_batch(&events, &holder_rows).await
    }
}

/// The (address, contract) pairs a transfer list touches, in first-seen
/// order, excluding the mint/burn sentinel.
fn touched_holder_keys(transfers: &[TransferRecord]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for transfer in transfers {
        for side in [&transfer.from, &transfer.to] {
            if side == ZERO_ADDRESS {
                continue;
            }
            let key = (side.clone(), transfer.contract.clone());
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
    keys
}

/// Walks transfers in source order over a working holder map seeded from
/// the store.
///
/// A debit whose holder is missing or short of funds is logged and
/// skipped while the matching credit still applies; one bad event must
/// not stall the cursor. Transaction counters increment once per
/// (address, tx_hash) pair within the batch.
pub(crate) fn apply_transfers(
    holders: &mut HashMap<(String, String), AssetHolder>,
    transfers: &[TransferRecord],
) {
    let mut counted: HashSet<(String, String)> = HashSet::new();
    for transfer in transfers {
        if transfer.from != ZERO_ADDRESS {
            let key = (transfer.from.clone(), transfer.contract.clone());
            match holders.get_mut(&key) {
                Some(holder) if holder.balance >= transfer.amount => {
                    if counted.insert((transfer.from.clone(), transfer.tx_hash.clone())) {
                        holder.transactions += 1;
                    }
                    holder.balance -= transfer.amount;
                }
                _ => {
                    error!(
                        contract = %transfer.contract,
                        tx_hash = %transfer.tx_hash,
                        from = %transfer.from,
                        to = %transfer.to,
                        amount = transfer.amount,
                        "invalid transfer: debit exceeds balance, skipping debit"
                    );
                }
            }
        }

        if transfer.to != ZERO_ADDRESS {
            let key = (transfer.to.clone(), transfer.contract.clone());
            let holder = holders.entry(key).or_insert_with(|| AssetHolder {
                address: transfer.to.clone(),
                contract: transfer.contract.clone(),
                ..AssetHolder::default()
            });
            if counted.insert((transfer.to.clone(), transfer.tx_hash.clone())) {
                holder.transactions += 1;
            }
            holder.balance += transfer.amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0100000000000000000000000000000000000000";

    fn transfer(tx_hash: &str, from: &str, to: &str, amount: u64) -> TransferRecord {
        TransferRecord {
            tx_hash: tx_hash.to_string(),
            contract: CONTRACT.to_string(),
            name: "transfer".to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount,
        }
    }

    fn holder(address: &str, balance: u64, transactions: u64) -> ((String, String), AssetHolder) {
        (
            (address.to_string(), CONTRACT.to_string()),
            AssetHolder {
                address: address.to_string(),
                contract: CONTRACT.to_string(),
                balance,
                transactions,
            },
        )
    }

    fn get<'a>(
        holders: &'a HashMap<(String, String), AssetHolder>,
        address: &str,
    ) -> &'a AssetHolder {
        &holders[&(address.to_string(), CONTRACT.to_string())]
    }

    #[test]
    fn test_simple_transfer_moves_balance_and_counts() {
        let mut holders = HashMap::from([holder("a", 500, 3)]);
        apply_transfers(&mut holders, &[transfer("t1", "a", "b", 100)]);

        assert_eq!(get(&holders, "a").balance, 400);
        assert_eq!(get(&holders, "a").transactions, 4);
        assert_eq!(get(&holders, "b").balance, 100);
        assert_eq!(get(&holders, "b").transactions, 1);
    }

    #[test]
    fn test_insufficient_debit_skipped_credit_applies() {
        let mut holders = HashMap::from([holder("a", 10, 1)]);
        apply_transfers(&mut holders, &[transfer("t1", "a", "b", 50)]);

        // The debit is refused, the credit still lands.
        assert_eq!(get(&holders, "a").balance, 10);
        assert_eq!(get(&holders, "a").transactions, 1);
        assert_eq!(get(&holders, "b").balance, 50);
        assert_eq!(get(&holders, "b").transactions, 1);
    }

    #[test]
    fn test_unknown_sender_is_not_created() {
        let mut holders = HashMap::new();
        apply_transfers(&mut holders, &[transfer("t1", "a", "b", 50)]);

        assert!(!holders.contains_key(&("a".to_string(), CONTRACT.to_string())));
        assert_eq!(get(&holders, "b").balance, 50);
    }

    #[test]
    fn test_mint_and_burn_skip_sentinel() {
        let mut holders = HashMap::from([holder("a", 100, 1)]);
        apply_transfers(
            &mut holders,
            &[
                transfer("t1", ZERO_ADDRESS, "a", 40),
                transfer("t2", "a", ZERO_ADDRESS, 20),
            ],
        );

        assert_eq!(get(&holders, "a").balance, 120);
        assert_eq!(get(&holders, "a").transactions, 3);
        assert!(!holders.contains_key(&(ZERO_ADDRESS.to_string(), CONTRACT.to_string())));
    }

    #[test]
    fn test_transaction_counted_once_per_tx_hash() {
        let mut holders = HashMap::from([holder("a", 500, 0)]);
        // Two transfers of the same transaction touching the same address.
        apply_transfers(
            &mut holders,
            &[transfer("t1", "a", "b", 10), transfer("t1", "a", "b", 20)],
        );

        assert_eq!(get(&holders, "a").balance, 470);
        assert_eq!(get(&holders, "a").transactions, 1);
        assert_eq!(get(&holders, "b").balance, 30);
        assert_eq!(get(&holders, "b").transactions, 1);
    }

    #[test]
    fn test_within_batch_dependency_in_source_order() {
        // b receives first, then spends what it just received.
        let mut holders = HashMap::from([holder("a", 100, 0)]);
        apply_transfers(
            &mut holders,
            &[transfer("t1", "a", "b", 100), transfer("t2", "b", "c", 60)],
        );

        assert_eq!(get(&holders, "a").balance, 0);
        assert_eq!(get(&holders, "b").balance, 40);
        assert_eq!(get(&holders, "c").balance, 60);
    }

    #[test]
    fn test_touched_keys_dedup_and_skip_sentinel() {
        let keys = touched_holder_keys(&[
            transfer("t1", "a", "b", 1),
            transfer("t2", ZERO_ADDRESS, "b", 1),
        ]);
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), CONTRACT.to_string()),
                ("b".to_string(), CONTRACT.to_string()),
            ]
        );
    }
}
