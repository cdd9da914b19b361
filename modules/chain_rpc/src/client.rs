//! HTTP client for the Tezos node JSON-RPC

use crate::fields::Json;
use crate::unpack::unpack_block;
use serde_json::Value;
use std::time::Duration;
use tessera_common::{
    Address, BlockHash, CycleBundle, CycleIndex, HeaderInfo, IndexError, Level,
    ProtocolConstants, ProtocolHash, RawBakingRight, RawEndorsingRight, UnpackedBlock,
    ValidationError, VoterListing,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Everything except malformed data is worth a retry
    pub fn is_transient(&self) -> bool {
        !matches!(self, RpcError::Validation(_) | RpcError::Json(_))
    }
}

impl From<RpcError> for IndexError {
    fn from(err: RpcError) -> IndexError {
        match err {
            RpcError::Validation(v) => IndexError::Validation(v),
            RpcError::Json(e) => IndexError::Validation(ValidationError::TypeMismatch {
                path: e.to_string(),
                expected: "json",
            }),
            other => IndexError::transient(other.to_string()),
        }
    }
}

/// Client over `chains/main/...` of one node endpoint
pub struct NodeClient {
    base: String,
    client: reqwest::Client,
    max_priority: i32,
}

impl NodeClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            client,
            max_priority: 8,
        })
    }

    async fn get(&self, path: &str) -> Result<Value, RpcError> {
        let url = format!("{}/{path}", self.base);
        debug!(%url, "RPC request");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Like [`get`] but folds 404 into absence
    async fn get_opt(&self, path: &str) -> Result<Option<Value>, RpcError> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(RpcError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn head(&self) -> Result<HeaderInfo, RpcError> {
        let doc = self.get("chains/main/blocks/head/header").await?;
        Ok(parse_header(&doc)?)
    }

    pub async fn header_at(&self, level: Level) -> Result<Option<HeaderInfo>, RpcError> {
        let Some(doc) = self.get_opt(&format!("chains/main/blocks/{level}/header")).await? else {
            return Ok(None);
        };
        Ok(Some(parse_header(&doc)?))
    }

    pub async fn block_at(&self, level: Level) -> Result<UnpackedBlock, RpcError> {
        let doc = self.get(&format!("chains/main/blocks/{level}")).await?;
        Ok(unpack_block(&doc)?)
    }

    pub async fn constants_at(&self, level: Level) -> Result<ProtocolConstants, RpcError> {
        let doc = self.get(&format!("chains/main/blocks/{level}/context/constants")).await?;
        Ok(parse_constants(&doc)?)
    }

    pub async fn cycle_bundle(
        &self,
        at_level: Level,
        cycle: CycleIndex,
    ) -> Result<CycleBundle, RpcError> {
        let baking = self
            .get(&format!(
                "chains/main/blocks/{at_level}/helpers/baking_rights?cycle={cycle}\
                 &max_priority={}&all=true",
                self.max_priority
            ))
            .await?;
        let endorsing = self
            .get(&format!(
                "chains/main/blocks/{at_level}/helpers/endorsing_rights?cycle={cycle}"
            ))
            .await?;
        // Seed and chosen snapshot index live in the raw cycle context
        let cycle_data = self
            .get_opt(&format!(
                "chains/main/blocks/{at_level}/context/raw/json/cycle/{cycle}"
            ))
            .await?;

        let mut baking_rights = Vec::new();
        for item in Json::root(&baking).array()? {
            baking_rights.push(RawBakingRight {
                level: item.at("level").i64()?,
                baker: Address::new(item.at("delegate").str()?)?,
                priority: item.at("priority").i32()?,
            });
        }
        let mut endorsing_rights = Vec::new();
        for item in Json::root(&endorsing).array()? {
            endorsing_rights.push(RawEndorsingRight {
                level: item.at("level").i64()?,
                baker: Address::new(item.at("delegate").str()?)?,
                slots: item.at("slots").array()?.len() as i32,
            });
        }

        let (seed, snapshot_index) = match &cycle_data {
            Some(doc) => {
                let j = Json::root(doc);
                (
                    j.at("random_seed").opt().and_then(|j| j.str().ok().map(str::to_string)),
                    j.at("roll_snapshot").opt().map(|j| j.i32()).transpose()?,
                )
            }
            None => (None, None),
        };

        Ok(CycleBundle {
            cycle,
            snapshot_index: snapshot_index.unwrap_or(0),
            snapshot_level: 0, // filled in by the engine from the cycle layout
            seed: seed.unwrap_or_default(),
            baking_rights,
            endorsing_rights,
        })
    }

    pub async fn voter_listings(&self, level: Level) -> Result<Vec<VoterListing>, RpcError> {
        let doc = self.get(&format!("chains/main/blocks/{level}/votes/listings")).await?;
        let mut listings = Vec::new();
        for item in Json::root(&doc).array()? {
            listings.push(VoterListing {
                pkh: Address::new(item.at("pkh").str()?)?,
                rolls: item.at("rolls").i32()?,
            });
        }
        Ok(listings)
    }
}

fn parse_header(doc: &Value) -> Result<HeaderInfo, ValidationError> {
    let j = Json::root(doc);
    Ok(HeaderInfo {
        level: j.at("level").i64()?,
        hash: BlockHash::new(j.at("hash").str()?)?,
        predecessor: BlockHash::new(j.at("predecessor").str()?)?,
        protocol: ProtocolHash::new(j.at("protocol").str()?)?,
        timestamp: j.at("timestamp").timestamp()?,
    })
}

/// Constants vary across protocols; only the cycle layout is mandatory,
/// everything else falls back to the previous defaults
fn parse_constants(doc: &Value) -> Result<ProtocolConstants, ValidationError> {
    let j = Json::root(doc);
    let d = ProtocolConstants::default();

    // A few fields turned into per-endorsement lists over time
    let first_or_self = |j: &Json| -> Result<Option<i64>, ValidationError> {
        let Some(j) = j.opt() else { return Ok(None) };
        if j.raw().is_some_and(Value::is_array) {
            Ok(Some(j.index(0).i64()?))
        } else {
            Ok(Some(j.i64()?))
        }
    };

    Ok(ProtocolConstants {
        preserved_cycles: j.at("preserved_cycles").i32()?,
        blocks_per_cycle: j.at("blocks_per_cycle").i32()?,
        blocks_per_commitment: opt_i32(&j.at("blocks_per_commitment"))?
            .unwrap_or(d.blocks_per_commitment),
        blocks_per_snapshot: opt_i32(&j.at("blocks_per_roll_snapshot"))?
            .unwrap_or(d.blocks_per_snapshot),
        blocks_per_voting_period: opt_i32(&j.at("blocks_per_voting_period"))?
            .unwrap_or(d.blocks_per_voting_period),
        endorsers_per_block: opt_i32(&j.at("endorsers_per_block"))?
            .unwrap_or(d.endorsers_per_block),
        time_between_blocks: j
            .at("time_between_blocks")
            .opt()
            .map(|j| j.index(0).i64())
            .transpose()?
            .unwrap_or(d.time_between_blocks),
        block_deposit: first_or_self(&j.at("block_security_deposit"))?.unwrap_or(d.block_deposit),
        endorsement_deposit: first_or_self(&j.at("endorsement_security_deposit"))?
            .unwrap_or(d.endorsement_deposit),
        block_reward: first_or_self(&j.at("block_reward"))?.unwrap_or(d.block_reward),
        endorsement_reward: first_or_self(&j.at("endorsement_reward"))?
            .unwrap_or(d.endorsement_reward),
        origination_size: opt_i32(&j.at("origination_size"))?.unwrap_or(d.origination_size),
        byte_cost: first_or_self(&j.at("cost_per_byte"))?.unwrap_or(d.byte_cost),
        seed_nonce_revelation_tip: first_or_self(&j.at("seed_nonce_revelation_tip"))?
            .unwrap_or(d.seed_nonce_revelation_tip),
        tokens_per_roll: first_or_self(&j.at("tokens_per_roll"))?.unwrap_or(d.tokens_per_roll),
        proposal_quorum: opt_i32(&j.at("min_proposal_quorum"))?.unwrap_or(d.proposal_quorum),
        quorum_min: opt_i32(&j.at("quorum_min"))?.unwrap_or(d.quorum_min),
        quorum_max: opt_i32(&j.at("quorum_max"))?.unwrap_or(d.quorum_max),
        supermajority: d.supermajority,
        lb_subsidy: first_or_self(&j.at("liquidity_baking_subsidy"))?.unwrap_or(d.lb_subsidy),
        lb_escape_ema_threshold: j
            .at("liquidity_baking_escape_ema_threshold")
            .opt()
            .map(|j| j.i64())
            .transpose()?
            .unwrap_or(d.lb_escape_ema_threshold),
    })
}

fn opt_i32(j: &Json) -> Result<Option<i32>, ValidationError> {
    j.opt().map(|j| j.i32()).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BLOCK_HASH: &str = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45gN";
    const PRED_HASH: &str = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45gQ";
    const PROTO: &str = "PsCARTHAGazKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQEb";

    fn header_doc(level: i64) -> serde_json::Value {
        json!({
            "level": level,
            "hash": BLOCK_HASH,
            "predecessor": PRED_HASH,
            "protocol": PROTO,
            "timestamp": "2020-09-28T08:49:34Z"
        })
    }

    async fn client_for(server: &MockServer) -> NodeClient {
        NodeClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_parses_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/main/blocks/101/header"))
            .respond_with(ResponseTemplate::new(200).set_body_json(header_doc(101)))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let header = client.header_at(101).await.unwrap().unwrap();
        assert_eq!(header.level, 101);
        assert_eq!(header.hash.as_str(), BLOCK_HASH);
        assert_eq!(header.timestamp, 1_601_282_974);
    }

    #[tokio::test]
    async fn missing_header_is_absence_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/main/blocks/999/header"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.header_at(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/main/blocks/head/header"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.head().await.unwrap_err();
        assert!(err.is_transient());
        assert!(IndexError::from(err).is_transient());
    }

    #[tokio::test]
    async fn malformed_header_is_a_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/main/blocks/head/header"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"level": 1})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.head().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(
            err,
            RpcError::Validation(ValidationError::MissingField { ref path }) if path == "hash"
        ));
    }

    #[tokio::test]
    async fn constants_parse_with_protocol_variation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chains/main/blocks/101/context/constants"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "preserved_cycles": 5,
                "blocks_per_cycle": 4096,
                "blocks_per_roll_snapshot": 256,
                "time_between_blocks": ["60", "40"],
                "endorsement_reward": ["1250000", "833333"],
                "tokens_per_roll": "8000000000",
                "min_proposal_quorum": 500
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let constants = client.constants_at(101).await.unwrap();
        assert_eq!(constants.preserved_cycles, 5);
        assert_eq!(constants.time_between_blocks, 60);
        assert_eq!(constants.endorsement_reward, 1_250_000);
        assert_eq!(constants.tokens_per_roll, 8_000_000_000);
        assert_eq!(constants.proposal_quorum, 500);
    }
}
