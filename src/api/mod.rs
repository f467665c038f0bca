//! Read façade over the indexed state.
//!
//! The HTTP layer dispatches into [`ReadApi`]; everything here returns
//! either a serializable result or an [`ApiError`] carrying one of the
//! wire error codes. Holder counts come from the in-memory cache and
//! never block on the store.

pub mod http;

use crate::chain::{AssetInfo, ChainRpc};
use crate::config::ContractKind;
use crate::core::context::IndexerContext;
use crate::core::decoder::{ascii_from_hex, u64_from_le_hex};
use crate::storage::StorageBackend;
use crate::utils::error::{IndexerError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const ERR_SUCCESS: i64 = 0;
pub const ERR_INVALID_METHOD: i64 = 1001;
pub const ERR_INVALID_PARAMS: i64 = 1002;
pub const ERR_INTERNAL: i64 = 1003;

/// Human-readable description of a wire error code.
pub fn error_desc(code: i64) -> &'static str {
    match code {
        ERR_SUCCESS => "SUCCESS",
        ERR_INVALID_METHOD => "INVALID METHOD",
        ERR_INVALID_PARAMS => "INVALID PARAMS",
        ERR_INTERNAL => "INTERNAL ERROR",
        _ => "UNKNOWN ERROR",
    }
}

/// A failed read-API call: a wire error code plus optional detail text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: i64,
    pub info: Option<String>,
}

impl ApiError {
    pub fn invalid_method() -> Self {
        Self {
            code: ERR_INVALID_METHOD,
            info: None,
        }
    }

    pub fn invalid_params() -> Self {
        Self {
            code: ERR_INVALID_PARAMS,
            info: None,
        }
    }

    pub fn invalid_params_info(info: impl Into<String>) -> Self {
        Self {
            code: ERR_INVALID_PARAMS,
            info: Some(info.into()),
        }
    }

    pub fn internal() -> Self {
        Self {
            code: ERR_INTERNAL,
            info: None,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// One row of a holder-distribution page.
#[derive(Debug, Clone, Serialize)]
pub struct AssetHolderView {
    pub address: String,
    pub balance: u64,
    /// Share of the asset's total supply.
    pub percent: f64,
    pub transactions: u64,
}

/// One balance of an address.
#[derive(Debug, Clone, Serialize)]
pub struct AssetBalance {
    pub contract: String,
    pub balance: u64,
}

/// Query API consumed by the HTTP layer.
pub struct ReadApi {
    ctx: Arc<IndexerContext>,
    storage: Arc<dyn StorageBackend>,
    chain: Arc<dyn ChainRpc>,
}

impl ReadApi {
    pub fn new(
        ctx: Arc<IndexerContext>,
        storage: Arc<dyn StorageBackend>,
        chain: Arc<dyn ChainRpc>,
    ) -> Self {
        Self {
            ctx,
            storage,
            chain,
        }
    }

    /// Symbol, total supply and precision of a monitored asset.
    pub async fn asset_info(&self, contract: &str) -> ApiResult<AssetInfo> {
        if !self.ctx.config.is_monitored(contract) {
            return Err(ApiError::invalid_params());
        }
        self.fetch_asset_info(contract).await.map_err(|e| {
            info!(contract, error = %e, "asset info lookup failed");
            ApiError::internal()
        })
    }

    /// Cached count of positive-balance holders.
    pub fn asset_holder_count(&self, contract: &str) -> ApiResult<i64> {
        if !self.ctx.config.is_monitored(contract) {
            return Err(ApiError::invalid_params());
        }
        Ok(self.ctx.holder_count(contract))
    }

    /// One page of the holder distribution, richest first.
    pub async fn asset_holders(
        &self,
        from: u32,
        count: u32,
        contract: &str,
    ) -> ApiResult<Vec<AssetHolderView>> {
        if !self.ctx.config.is_monitored(contract) {
            return Err(ApiError::invalid_params());
        }
        let max_page = self.ctx.config.max_query_page_size;
        if count > max_page {
            return Err(ApiError::invalid_params_info(format!(
                "count out of range[1, {max_page}]"
            )));
        }

        let total_supply = match self.fetch_total_supply(contract).await {
            Ok(supply) => supply,
            Err(e) => {
                info!(contract, error = %e, "total supply lookup failed");
                return Err(ApiError::internal());
            }
        };
        if total_supply == 0 {
            return Err(ApiError::internal());
        }

        let holders = self
            .storage
            .query_holders(from, count, "", contract)
            .await
            .map_err(|e| {
                info!(contract, error = %e, "holder query failed");
                ApiError::internal()
            })?;

        Ok(holders
            .into_iter()
            .map(|h| AssetHolderView {
                address: h.address,
                balance: h.balance,
                percent: h.balance as f64 / total_supply as f64,
                transactions: h.transactions,
            })
            .collect())
    }

    /// Balances of `address`, for one monitored contract or all of them
    /// when `contract` is empty.
    pub async fn balances(&self, address: &str, contract: &str) -> ApiResult<Vec<AssetBalance>> {
        if address.is_empty() {
            return Err(ApiError::invalid_params());
        }
        if !contract.is_empty() && !self.ctx.config.is_monitored(contract) {
            return Err(ApiError::invalid_params());
        }
        let holders = self
            .storage
            .query_holders(0, 0, address, contract)
            .await
            .map_err(|e| {
                info!(address, contract, error = %e, "balance query failed");
                ApiError::internal()
            })?;

        Ok(holders
            .into_iter()
            .map(|h| AssetBalance {
                contract: h.contract,
                balance: h.balance,
            })
            .collect())
    }

    async fn fetch_asset_info(&self, contract: &str) -> Result<AssetInfo> {
        match self.ctx.config.kind_of(contract) {
            ContractKind::NativeCoin | ContractKind::NativeGas => {
                self.chain.native_asset_info(contract).await
            }
            ContractKind::Token => {
                let symbol_hex = self.chain.pre_exec_invoke(contract, "symbol").await?;
                let symbol = ascii_from_hex(&symbol_hex)
                    .ok_or_else(|| IndexerError::Decode(format!("symbol: {symbol_hex}")))?;
                let supply_hex = self.chain.pre_exec_invoke(contract, "totalSupply").await?;
                let total_supply = u64_from_le_hex(&supply_hex)
                    .ok_or_else(|| IndexerError::Decode(format!("totalSupply: {supply_hex}")))?;
                let decimals_hex = self.chain.pre_exec_invoke(contract, "decimals").await?;
                let precision = u64_from_le_hex(&decimals_hex)
                    .ok_or_else(|| IndexerError::Decode(format!("decimals: {decimals_hex}")))?
                    as u8;
                Ok(AssetInfo {
                    symbol,
                    total_supply,
                    precision,
                })
            }
            ContractKind::Unknown => Err(IndexerError::Internal("unknown contract".to_string())),
        }
    }

    async fn fetch_total_supply(&self, contract: &str) -> Result<u64> {
        match self.ctx.config.kind_of(contract) {
            ContractKind::NativeCoin | ContractKind::NativeGas => {
                Ok(self.chain.native_asset_info(contract).await?.total_supply)
            }
            ContractKind::Token => {
                let supply_hex = self.chain.pre_exec_invoke(contract, "totalSupply").await?;
                u64_from_le_hex(&supply_hex)
                    .ok_or_else(|| IndexerError::Decode(format!("totalSupply: {supply_hex}")))
            }
            ContractKind::Unknown => Err(IndexerError::Internal("unknown contract".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_desc_covers_wire_codes() {
        assert_eq!(error_desc(ERR_SUCCESS), "SUCCESS");
        assert_eq!(error_desc(ERR_INVALID_METHOD), "INVALID METHOD");
        assert_eq!(error_desc(ERR_INVALID_PARAMS), "INVALID PARAMS");
        assert_eq!(error_desc(ERR_INTERNAL), "INTERNAL ERROR");
        assert_eq!(error_desc(-1), "UNKNOWN ERROR");
    }

    #[test]
    fn test_holder_view_serialization_shape() {
        let view = AssetHolderView {
            address: "aa".to_string(),
            balance: 50,
            percent: 0.5,
            transactions: 2,
        };
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"address": "aa", "balance": 50, "percent": 0.5, "transactions": 2})
        );
    }

    #[test]
    fn test_api_error_constructors() {
        assert_eq!(ApiError::invalid_method().code, ERR_INVALID_METHOD);
        assert_eq!(ApiError::invalid_params().code, ERR_INVALID_PARAMS);
        assert_eq!(ApiError::internal().code, ERR_INTERNAL);
        let with_info = ApiError::invalid_params_info("count out of range[1, 100]");
        assert_eq!(with_info.info.as_deref(), Some("count out of range[1, 100]"));
    }
}
