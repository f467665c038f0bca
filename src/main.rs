//! Indexer entry point: config, identity, storage, chain client, pipeline
//! and the HTTP read surface, torn down together on ctrl-c.

use asset_indexer::api::{http, ReadApi};
use asset_indexer::telemetry::{init_telemetry, TelemetryConfig};
use asset_indexer::{
    identity, AssetIndexer, HttpChainRpc, IndexerConfig, IndexerContext, Result, Storage,
    StorageBackend,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(&TelemetryConfig::default());

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(IndexerConfig::from_file(&config_path)?);

    let node_id = identity::load_or_generate(identity::NODE_ID_FILE)?;
    info!(node_id, "node identity loaded");

    let storage: Arc<dyn StorageBackend> = Arc::new(Storage::connect(&config).await?);
    storage.init_schema().await?;
    let chain = Arc::new(HttpChainRpc::new(&config.rpc_address));

    let ctx = Arc::new(IndexerContext::new(config.clone(), node_id));
    let indexer = AssetIndexer::new(ctx.clone(), storage.clone(), chain.clone());
    indexer.start().await?;

    let api = Arc::new(ReadApi::new(ctx, storage, chain));
    let token = indexer.cancellation_token();

    tokio::select! {
        // A bind failure here is fatal; everything else is absorbed
        // inside the pipeline tasks.
        res = http::serve(api, config.http_port, token.clone()) => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            indexer.shutdown();
        }
    }
    Ok(())
}
