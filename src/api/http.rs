//! HTTP read surface.
//!
//! Any request path is treated as a method name (`/getAssetInfo`,
//! `/getBalance`, ...), parameters arrive in the query string, and every
//! response is the same JSON envelope with HTTP status 200; errors travel
//! in `error_code`/`error_info`. CORS is permissive: the surface is
//! read-only and meant for browser explorers.

use crate::api::{error_desc, ApiError, ApiResult, ReadApi, ERR_SUCCESS};
use axum::extract::{Query, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Response envelope shared by every method.
#[derive(Debug, Serialize)]
struct Envelope {
    qid: String,
    method: String,
    error_code: i64,
    error_info: String,
    result: Value,
}

/// Builds the router for a [`ReadApi`].
pub fn router(api: Arc<ReadApi>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(CorsLayer::permissive())
        .with_state(api)
}

/// Binds `0.0.0.0:port` and serves until the token is cancelled.
///
/// A bind failure is returned to the caller; it is the one fatal error
/// of the process.
pub async fn serve(
    api: Arc<ReadApi>,
    port: u16,
    token: CancellationToken,
) -> crate::utils::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    axum::serve(listener, router(api))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

async fn dispatch(
    State(api): State<Arc<ReadApi>>,
    uri: Uri,
    Query(raw_params): Query<HashMap<String, String>>,
) -> Response {
    let method = uri.path().trim_start_matches('/').to_string();
    if method == "favicon.ico" {
        return ().into_response();
    }

    let mut qid = String::new();
    let mut params = HashMap::new();
    for (key, value) in raw_params {
        if key == "qid" {
            qid = value;
            continue;
        }
        params.insert(key.to_lowercase(), value);
    }
    debug!(%method, %qid, "http request");

    let outcome = handle_method(&api, &method, &params).await;
    let (error_code, error_info, result) = match outcome {
        Ok(result) => (ERR_SUCCESS, error_desc(ERR_SUCCESS).to_string(), result),
        Err(e) => {
            let info = e.info.unwrap_or_else(|| error_desc(e.code).to_string());
            (e.code, info, Value::Null)
        }
    };

    Json(Envelope {
        qid,
        method,
        error_code,
        error_info,
        result,
    })
    .into_response()
}

async fn handle_method(
    api: &ReadApi,
    method: &str,
    params: &HashMap<String, String>,
) -> ApiResult<Value> {
    match method.to_lowercase().as_str() {
        "getassetinfo" => {
            let contract = required(params, "contract")?;
            let info = api.asset_info(contract).await?;
            to_value(&info)
        }
        "getassetholdercount" => {
            let contract = required(params, "contract")?;
            let count = api.asset_holder_count(contract)?;
            to_value(&count)
        }
        "getassetholder" => {
            let from = required_u32(params, "from")?;
            let count = required_u32(params, "count")?;
            let contract = required(params, "contract")?;
            let holders = api.asset_holders(from, count, contract).await?;
            to_value(&holders)
        }
        "getbalance" => {
            let address = required(params, "address")?;
            let contract = params.get("contract").map(String::as_str).unwrap_or("");
            let balances = api.balances(address, contract).await?;
            to_value(&balances)
        }
        _ => Err(ApiError::invalid_method()),
    }
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> ApiResult<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(ApiError::invalid_params)
}

fn required_u32(params: &HashMap<String, String>, name: &str) -> ApiResult<u32> {
    required(params, name)?
        .parse()
        .map_err(|_| ApiError::invalid_params())
}

fn to_value<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|_| ApiError::internal())
}
