//! In-memory test doubles for the storage and chain seams.

use asset_indexer::{
    AssetHolder, AssetInfo, ChainRpc, Heartbeat, IndexerError, Notification, Result,
    StorageBackend, TxEvent, TxEventRow,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct MockState {
    tx_events: HashMap<String, TxEventRow>,
    holders: HashMap<(String, String), AssetHolder>,
    heartbeats: HashMap<String, (u32, Instant)>,
}

/// In-memory [`StorageBackend`] with the same observable semantics as the
/// Postgres implementation, plus test hooks for aging heartbeats and
/// simulating a database outage.
#[derive(Default)]
pub struct MockStorage {
    state: Mutex<MockState>,
    fail_applies: AtomicBool,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a holder row.
    pub fn put_holder(&self, address: &str, contract: &str, balance: u64, transactions: u64) {
        self.state.lock().holders.insert(
            (address.to_string(), contract.to_string()),
            AssetHolder {
                address: address.to_string(),
                contract: contract.to_string(),
                balance,
                transactions,
            },
        );
    }

    pub fn holder(&self, address: &str, contract: &str) -> Option<AssetHolder> {
        self.state
            .lock()
            .holders
            .get(&(address.to_string(), contract.to_string()))
            .cloned()
    }

    pub fn tx_event(&self, tx_hash: &str) -> Option<TxEventRow> {
        self.state.lock().tx_events.get(tx_hash).cloned()
    }

    pub fn tx_event_count(&self) -> usize {
        self.state.lock().tx_events.len()
    }

    /// Moves a heartbeat row's last update into the past.
    pub fn age_heartbeat(&self, module: &str, secs: u64) {
        if let Some((_, last_update)) = self.state.lock().heartbeats.get_mut(module) {
            *last_update -= Duration::from_secs(secs);
        }
    }

    /// When set, `apply_batch` fails with a retryable error.
    pub fn set_db_outage(&self, outage: bool) {
        self.fail_applies.store(outage, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_batch(&self, tx_events: &[TxEventRow], holders: &[AssetHolder]) -> Result<()> {
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(IndexerError::Internal("simulated db outage".to_string()));
        }
        let mut state = self.state.lock();
        for event in tx_events {
            state
                .tx_events
                .entry(event.tx_hash.clone())
                .or_insert_with(|| event.clone());
        }
        for holder in holders {
            state.holders.insert(
                (holder.address.clone(), holder.contract.clone()),
                holder.clone(),
            );
        }
        Ok(())
    }

    async fn existing_tx_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        let state = self.state.lock();
        Ok(hashes
            .iter()
            .filter(|h| state.tx_events.contains_key(*h))
            .cloned()
            .collect())
    }

    async fn holders_by_key(
        &self,
        keys: &[(String, String)],
    ) -> Result<HashMap<(String, String), AssetHolder>> {
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|k| state.holders.get(k).map(|h| (k.clone(), h.clone())))
            .collect())
    }

    async fn query_holders(
        &self,
        from: u32,
        count: u32,
        address: &str,
        contract: &str,
    ) -> Result<Vec<AssetHolder>> {
        let state = self.state.lock();
        let mut holders: Vec<AssetHolder> = state
            .holders
            .values()
            .filter(|h| {
                if address.is_empty() {
                    h.contract == contract
                } else if contract.is_empty() {
                    h.address == address
                } else {
                    h.address == address && h.contract == contract
                }
            })
            .cloned()
            .collect();
        holders.sort_by(|a, b| {
            b.balance
                .cmp(&a.balance)
                .then_with(|| a.address.cmp(&b.address))
        });
        if address.is_empty() {
            holders = holders
                .into_iter()
                .skip(from as usize)
                .take(count as usize)
                .collect();
        } else if count > 0 {
            holders.truncate(count as usize);
        }
        Ok(holders)
    }

    async fn holder_counts(&self) -> Result<HashMap<String, i64>> {
        let state = self.state.lock();
        let mut counts = HashMap::new();
        for holder in state.holders.values() {
            if holder.balance > 0 {
                *counts.entry(holder.contract.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn max_applied_height(&self) -> Result<u32> {
        let state = self.state.lock();
        Ok(state
            .tx_events
            .values()
            .map(|e| e.height)
            .max()
            .unwrap_or(0))
    }

    async fn is_genesis_applied(&self) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.tx_events.values().any(|e| e.height == 0))
    }

    async fn heartbeat(&self, module: &str) -> Result<Option<Heartbeat>> {
        let state = self.state.lock();
        Ok(state.heartbeats.get(module).map(|(node_id, _)| Heartbeat {
            module: module.to_string(),
            node_id: *node_id,
        }))
    }

    async fn insert_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        let mut state = self.state.lock();
        state
            .heartbeats
            .entry(heartbeat.module.clone())
            .or_insert((heartbeat.node_id, Instant::now()));
        Ok(())
    }

    async fn update_heartbeat(&self, module: &str, node_id: u32) -> Result<bool> {
        let mut state = self.state.lock();
        match state.heartbeats.get_mut(module) {
            Some((owner, last_update)) if *owner == node_id => {
                *last_update = Instant::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_heartbeat(
        &self,
        module: &str,
        new_node_id: u32,
        expected_prev: u32,
        timeout_secs: u32,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.heartbeats.get_mut(module) {
            Some((owner, last_update))
                if *owner == expected_prev
                    && last_update.elapsed() >= Duration::from_secs(u64::from(timeout_secs)) =>
            {
                *owner = new_node_id;
                *last_update = Instant::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn check_heartbeat_timeout(&self, module: &str, timeout_secs: u32) -> Result<u32> {
        let state = self.state.lock();
        Ok(match state.heartbeats.get(module) {
            Some((owner, last_update))
                if last_update.elapsed() >= Duration::from_secs(u64::from(timeout_secs)) =>
            {
                *owner
            }
            _ => 0,
        })
    }
}

/// Scripted [`ChainRpc`]: a settable tip and per-height event lists.
#[derive(Default)]
pub struct MockChain {
    tip: AtomicU32,
    blocks: Mutex<HashMap<u32, Vec<TxEvent>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, height: u32) {
        self.tip.store(height, Ordering::SeqCst);
    }

    pub fn put_block(&self, height: u32, events: Vec<TxEvent>) {
        self.blocks.lock().insert(height, events);
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn current_block_height(&self) -> Result<u32> {
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn block_events(&self, height: u32) -> Result<Vec<TxEvent>> {
        Ok(self.blocks.lock().get(&height).cloned().unwrap_or_default())
    }

    async fn native_asset_info(&self, _contract: &str) -> Result<AssetInfo> {
        Ok(AssetInfo {
            symbol: "COIN".to_string(),
            total_supply: 1_000_000_000,
            precision: 0,
        })
    }

    async fn pre_exec_invoke(&self, _contract: &str, method: &str) -> Result<String> {
        match method {
            // "PAX"
            "symbol" => Ok(hex::encode("PAX")),
            // 500_000 little-endian
            "totalSupply" => Ok("20a107".to_string()),
            "decimals" => Ok("08".to_string()),
            _ => Err(IndexerError::Rpc(format!("unknown method {method}"))),
        }
    }
}

/// A native-convention transfer event as the chain node reports it.
pub fn native_transfer_event(
    tx_hash: &str,
    contract: &str,
    from_b58: &str,
    to_b58: &str,
    amount: u64,
) -> TxEvent {
    TxEvent {
        tx_hash: tx_hash.to_string(),
        state: 1,
        gas_consumed: 10_000_000,
        notify: vec![Notification {
            contract: contract.to_string(),
            states: serde_json::json!(["transfer", from_b58, to_b58, amount]),
        }],
    }
}
