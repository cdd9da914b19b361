//! Tessera indexer process: wires the RPC client, store, protocol engine
//! and sync controller together

use anyhow::Result;
use clap::Parser;
use config::{Config, File};
use tessera_module_chain_rpc::{DisabledQuoteFeed, NodeClient};
use tessera_module_protocol_engine::ProtocolEngine;
use tessera_module_state_store::Store;
use tessera_module_sync::{ChainEvent, SyncController};
use tokio::sync::watch;
use tracing::{error, info};

mod configuration;
use configuration::IndexerConfig;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, value_name = "PATH", default_value = "tessera.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut builder =
        Config::builder().add_source(File::with_name(&args.config).required(false));
    // Environment variables beat the file for the documented knobs
    for (variable, key) in [
        ("TESSERA_NODE_ENDPOINT", "node.endpoint"),
        ("TESSERA_DATABASE_PATH", "database.path"),
        ("TESSERA_SYNC_START_LEVEL", "sync.start-level"),
        ("TESSERA_SYNC_RPC_TIMEOUT_MS", "sync.rpc-timeout-ms"),
        ("TESSERA_SYNC_MAX_BACKOFF_MS", "sync.max-backoff-ms"),
    ] {
        if let Ok(value) = std::env::var(variable) {
            builder = builder.set_override(key, value)?;
        }
    }
    let config = IndexerConfig::from_config(&builder.build()?)?;
    info!(
        endpoint = %config.node_endpoint,
        database = %config.database_path,
        start_level = config.start_level,
        "Starting indexer"
    );

    let client = NodeClient::new(&config.node_endpoint, config.rpc_timeout)?;
    let store = Store::open(&config.database_path)?;
    let engine = ProtocolEngine::new(store, config.start_level)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (controller, mut events) = SyncController::new(
        client,
        engine,
        Box::new(DisabledQuoteFeed),
        config.sync.clone(),
        shutdown_rx,
    );

    // Forward writer notifications; a real deployment hangs the WebSocket
    // fan-out and API cache refresh off this stream
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ChainEvent::Applied { level, .. } => {
                    if level % 1000 == 0 {
                        info!(level, "Chain head advanced");
                    }
                }
                ChainEvent::Reorg { level } => info!(level, "Chain reorganized"),
                ChainEvent::ProtocolChange { hash } => info!(%hash, "Protocol changed"),
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    match controller.run().await {
        Ok(()) => {
            info!("Clean shutdown");
            Ok(())
        }
        Err(err) => {
            error!(%err, "Writer stopped on unrecoverable error");
            Err(err)
        }
    }
}
