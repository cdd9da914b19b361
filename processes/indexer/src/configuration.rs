//! Typed view over the process configuration
//!
//! Values come from an optional TOML file plus `TESSERA_`-prefixed
//! environment variables (`TESSERA_NODE_ENDPOINT`, `TESSERA_DATABASE_PATH`,
//! `TESSERA_SYNC_START_LEVEL`, ...).

use anyhow::{Context, Result};
use config::Config;
use std::time::Duration;
use tessera_common::Level;
use tessera_module_sync::SyncConfig;

const CONFIG_KEY_NODE_ENDPOINT: &str = "node.endpoint";
const CONFIG_KEY_DATABASE_PATH: &str = "database.path";
const CONFIG_KEY_START_LEVEL: &str = "sync.start-level";
const CONFIG_KEY_RPC_TIMEOUT_MS: &str = "sync.rpc-timeout-ms";
const CONFIG_KEY_MAX_BACKOFF_MS: &str = "sync.max-backoff-ms";

const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MIN_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub node_endpoint: String,
    pub database_path: String,
    /// Fast-forward to this level without indexing history
    pub start_level: Level,
    pub rpc_timeout: Duration,
    pub sync: SyncConfig,
}

impl IndexerConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let node_endpoint = config
            .get_string(CONFIG_KEY_NODE_ENDPOINT)
            .context("node endpoint is required (TESSERA_NODE_ENDPOINT)")?;
        let database_path = config
            .get_string(CONFIG_KEY_DATABASE_PATH)
            .context("database path is required (TESSERA_DATABASE_PATH)")?;
        let start_level = config.get_int(CONFIG_KEY_START_LEVEL).unwrap_or(1).max(1);
        let rpc_timeout_ms =
            config.get_int(CONFIG_KEY_RPC_TIMEOUT_MS).unwrap_or(DEFAULT_RPC_TIMEOUT_MS as i64);
        let max_backoff_ms =
            config.get_int(CONFIG_KEY_MAX_BACKOFF_MS).unwrap_or(DEFAULT_MAX_BACKOFF_MS as i64);

        Ok(Self {
            node_endpoint,
            database_path,
            start_level,
            rpc_timeout: Duration::from_millis(rpc_timeout_ms.max(1) as u64),
            sync: SyncConfig {
                min_backoff: Duration::from_millis(DEFAULT_MIN_BACKOFF_MS),
                max_backoff: Duration::from_millis(max_backoff_ms.max(1) as u64),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_endpoint_and_database() {
        let empty = Config::builder().build().unwrap();
        assert!(IndexerConfig::from_config(&empty).is_err());

        let full = Config::builder()
            .set_override(CONFIG_KEY_NODE_ENDPOINT, "http://localhost:8732")
            .unwrap()
            .set_override(CONFIG_KEY_DATABASE_PATH, "/tmp/tessera.db")
            .unwrap()
            .build()
            .unwrap();
        let parsed = IndexerConfig::from_config(&full).unwrap();
        assert_eq!(parsed.start_level, 1);
        assert_eq!(parsed.rpc_timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn tunables_override_defaults() {
        let config = Config::builder()
            .set_override(CONFIG_KEY_NODE_ENDPOINT, "http://localhost:8732")
            .unwrap()
            .set_override(CONFIG_KEY_DATABASE_PATH, ":memory:")
            .unwrap()
            .set_override(CONFIG_KEY_START_LEVEL, 1_500_000)
            .unwrap()
            .set_override(CONFIG_KEY_MAX_BACKOFF_MS, 5_000)
            .unwrap()
            .build()
            .unwrap();
        let parsed = IndexerConfig::from_config(&config).unwrap();
        assert_eq!(parsed.start_level, 1_500_000);
        assert_eq!(parsed.sync.max_backoff, Duration::from_millis(5_000));
    }
}
