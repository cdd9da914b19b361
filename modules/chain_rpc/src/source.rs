//! Seam between the sync controller and whatever serves chain data

use crate::client::{NodeClient, RpcError};
use async_trait::async_trait;
use tessera_common::{
    CycleBundle, CycleIndex, HeaderInfo, Level, ProtocolConstants, UnpackedBlock, VoterListing,
};

/// Read-only chain data provider; the controller only ever talks to this
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn head(&self) -> Result<HeaderInfo, RpcError>;
    async fn header_at(&self, level: Level) -> Result<Option<HeaderInfo>, RpcError>;
    async fn block_at(&self, level: Level) -> Result<UnpackedBlock, RpcError>;
    async fn constants_at(&self, level: Level) -> Result<ProtocolConstants, RpcError>;
    /// Rights and seed for a future cycle, queried at `at_level`
    async fn cycle_bundle(&self, at_level: Level, cycle: CycleIndex)
        -> Result<CycleBundle, RpcError>;
    async fn voter_listings(&self, level: Level) -> Result<Vec<VoterListing>, RpcError>;
}

#[async_trait]
impl ChainSource for NodeClient {
    async fn head(&self) -> Result<HeaderInfo, RpcError> {
        NodeClient::head(self).await
    }

    async fn header_at(&self, level: Level) -> Result<Option<HeaderInfo>, RpcError> {
        NodeClient::header_at(self, level).await
    }

    async fn block_at(&self, level: Level) -> Result<UnpackedBlock, RpcError> {
        NodeClient::block_at(self, level).await
    }

    async fn constants_at(&self, level: Level) -> Result<ProtocolConstants, RpcError> {
        NodeClient::constants_at(self, level).await
    }

    async fn cycle_bundle(
        &self,
        at_level: Level,
        cycle: CycleIndex,
    ) -> Result<CycleBundle, RpcError> {
        NodeClient::cycle_bundle(self, at_level, cycle).await
    }

    async fn voter_listings(&self, level: Level) -> Result<Vec<VoterListing>, RpcError> {
        NodeClient::voter_listings(self, level).await
    }
}
