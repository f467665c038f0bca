//! Chain RPC access.
//!
//! The chain node is reached over JSON-RPC 2.0. [`ChainRpc`] is the seam the
//! rest of the crate programs against; [`HttpChainRpc`] is the production
//! implementation. Tests substitute their own implementations.

use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One smart-contract notification emitted by a transaction.
///
/// `states` is whatever the contract pushed: conventions differ between
/// native and generic contracts, so it stays untyped until the decoder
/// interprets it.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(rename = "ContractAddress")]
    pub contract: String,
    #[serde(rename = "States", default)]
    pub states: Value,
}

/// Execution record of a single transaction, with its notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "TxHash")]
    pub tx_hash: String,
    #[serde(rename = "State")]
    pub state: i32,
    #[serde(rename = "GasConsumed")]
    pub gas_consumed: u64,
    #[serde(rename = "Notify", default)]
    pub notify: Vec<Notification>,
}

/// On-chain metadata of an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub symbol: String,
    pub total_supply: u64,
    pub precision: u8,
}

/// Read access to the chain node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Height of the current chain tip.
    async fn current_block_height(&self) -> Result<u32>;

    /// Smart-contract events of every transaction in the block at `height`.
    async fn block_events(&self, height: u32) -> Result<Vec<TxEvent>>;

    /// Typed metadata accessor for the native coin and gas contracts.
    async fn native_asset_info(&self, contract: &str) -> Result<AssetInfo>;

    /// Read-only invocation of a generic token contract method
    /// (`symbol`, `totalSupply`, `decimals`). Returns the raw hex-encoded
    /// VM result; interpretation is up to the caller.
    async fn pre_exec_invoke(&self, contract: &str, method: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct NativeAssetBody {
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "TotalSupply")]
    total_supply: u64,
    #[serde(rename = "Decimals")]
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct InvokeBody {
    #[serde(rename = "Result")]
    result: String,
}

/// JSON-RPC 2.0 client for a chain node.
pub struct HttpChainRpc {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpChainRpc {
    /// Creates a client for the node at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let envelope: RpcEnvelope = resp.json().await?;
        if let Some(err) = envelope.error {
            return Err(IndexerError::Rpc(format!(
                "{method} failed: {} (code {})",
                err.message, err.code
            )));
        }
        envelope
            .result
            .ok_or_else(|| IndexerError::Rpc(format!("{method}: empty result")))
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn current_block_height(&self) -> Result<u32> {
        let result = self.call("getblockcount", json!([])).await?;
        let count: u32 = serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("getblockcount: {e}")))?;
        // The node reports the block count; the tip height is one less.
        Ok(count.saturating_sub(1))
    }

    async fn block_events(&self, height: u32) -> Result<Vec<TxEvent>> {
        let result = self.call("getsmartcodeevent", json!([height])).await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("getsmartcodeevent {height}: {e}")))
    }

    async fn native_asset_info(&self, contract: &str) -> Result<AssetInfo> {
        let result = self.call("getnativeasset", json!([contract])).await?;
        let body: NativeAssetBody = serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("getnativeasset {contract}: {e}")))?;
        Ok(AssetInfo {
            symbol: body.symbol,
            total_supply: body.total_supply,
            precision: body.decimals,
        })
    }

    async fn pre_exec_invoke(&self, contract: &str, method: &str) -> Result<String> {
        let result = self.call("preexecinvoke", json!([contract, method])).await?;
        let body: InvokeBody = serde_json::from_value(result)
            .map_err(|e| IndexerError::Rpc(format!("preexecinvoke {contract}.{method}: {e}")))?;
        Ok(body.result)
    }
}
