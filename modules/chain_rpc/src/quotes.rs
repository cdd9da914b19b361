//! Advisory price feed seam

use crate::client::RpcError;
use async_trait::async_trait;
use tessera_common::{Level, Quote};

/// Supplies one quote row per applied level; entirely optional
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    async fn quote_at(&self, level: Level, timestamp: i64) -> Result<Option<Quote>, RpcError>;
}

/// Default feed - quotes stay off
pub struct DisabledQuoteFeed;

#[async_trait]
impl QuoteFeed for DisabledQuoteFeed {
    async fn quote_at(&self, _level: Level, _timestamp: i64) -> Result<Option<Quote>, RpcError> {
        Ok(None)
    }
}
