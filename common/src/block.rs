//! Blocks - the unpacked wire form and the persisted row

use crate::address::{Address, BlockHash, OpHash, ProposalHash, ProtocolHash};
use crate::operation::OpStatus;
use crate::voting::Ballot;
use crate::{AccountId, CycleIndex, Level, Mutez, PeriodIndex};
use bitmask_enum::bitmask;

/// Which operation kinds a block contains
#[bitmask(u32)]
pub enum OperationsMask {
    Endorsements,
    Transactions,
    Originations,
    Delegations,
    Reveals,
    Proposals,
    Ballots,
    Activations,
    DoubleBakings,
    DoubleEndorsings,
    NonceRevelations,
    Migrations,
    RegisterConstants,
}

/// Node-side operation grouping, applied in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationPass {
    Consensus,
    Voting,
    Anonymous,
    Manager,
}

impl ValidationPass {
    pub const ALL: [ValidationPass; 4] = [
        ValidationPass::Consensus,
        ValidationPass::Voting,
        ValidationPass::Anonymous,
        ValidationPass::Manager,
    ];
}

/// Status, errors, fee and counter shared by all manager operations
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerMeta {
    pub status: OpStatus,
    /// Node-reported errors, JSON text
    pub errors: Option<String>,
    pub fee: Mutez,
    pub counter: i64,
}

/// Internal result carried by a manager operation, applied after the outer op
#[derive(Debug, Clone, PartialEq)]
pub enum InternalContent {
    Transaction {
        source: Address,
        nonce: i32,
        status: OpStatus,
        errors: Option<String>,
        amount: Mutez,
        destination: Address,
        entrypoint: Option<String>,
        parameters: Option<String>,
        allocated_destination: bool,
        paid_storage_diff: i64,
    },
    Origination {
        source: Address,
        nonce: i32,
        status: OpStatus,
        errors: Option<String>,
        balance: Mutez,
        delegate: Option<Address>,
        script: Option<String>,
        storage: Option<String>,
        originated: Option<Address>,
        paid_storage_diff: i64,
    },
    Delegation {
        source: Address,
        nonce: i32,
        status: OpStatus,
        errors: Option<String>,
        delegate: Option<Address>,
    },
}

/// One operation content, decoded from the node's JSON
#[derive(Debug, Clone, PartialEq)]
pub enum UnpackedContent {
    Endorsement {
        delegate: Address,
        slots: i32,
        endorsed_level: Level,
    },
    SeedNonceRevelation {
        revealed_level: Level,
        nonce: String,
    },
    Activation {
        account: Address,
        balance: Mutez,
    },
    DoubleBaking {
        accused_level: Level,
        offender: Address,
    },
    DoubleEndorsing {
        accused_level: Level,
        offender: Address,
    },
    Proposals {
        source: Address,
        period: PeriodIndex,
        proposals: Vec<ProposalHash>,
    },
    Ballot {
        source: Address,
        period: PeriodIndex,
        proposal: ProposalHash,
        vote: Ballot,
    },
    Reveal {
        source: Address,
        meta: ManagerMeta,
        public_key: String,
    },
    Transaction {
        source: Address,
        meta: ManagerMeta,
        amount: Mutez,
        destination: Address,
        entrypoint: Option<String>,
        parameters: Option<String>,
        allocated_destination: bool,
        paid_storage_diff: i64,
        internals: Vec<InternalContent>,
    },
    Origination {
        source: Address,
        meta: ManagerMeta,
        balance: Mutez,
        delegate: Option<Address>,
        script: Option<String>,
        storage: Option<String>,
        originated: Option<Address>,
        paid_storage_diff: i64,
        internals: Vec<InternalContent>,
    },
    Delegation {
        source: Address,
        meta: ManagerMeta,
        delegate: Option<Address>,
    },
    RegisterConstant {
        source: Address,
        meta: ManagerMeta,
        expression: String,
        global_address: Option<String>,
        storage_used: i64,
    },
}

/// Operation group - one hash, one validation pass, one or more contents
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedGroup {
    pub hash: OpHash,
    pub pass: ValidationPass,
    pub contents: Vec<UnpackedContent>,
}

/// A fully decoded block, ready for the protocol engine
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedBlock {
    pub hash: BlockHash,
    pub level: Level,
    pub predecessor: BlockHash,
    /// UNIX timestamp
    pub timestamp: i64,
    pub protocol: ProtocolHash,
    pub next_protocol: ProtocolHash,
    pub baker: Address,
    pub priority: i32,
    pub cycle: CycleIndex,
    pub cycle_position: i32,
    pub voting_period_index: PeriodIndex,
    pub voting_period_position: i32,
    /// Commitment to a future seed nonce, present at commitment levels
    pub seed_nonce_hash: Option<String>,
    pub lb_escape_vote: Option<bool>,
    pub groups: Vec<UnpackedGroup>,
}

/// Header fields the sync controller needs for reorg detection
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderInfo {
    pub level: Level,
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    pub protocol: ProtocolHash,
    pub timestamp: i64,
}

/// Everything the engine needs to apply one block: the block itself plus
/// side data the controller prefetched (cycle rights, fresh constants on a
/// protocol change, voter listings at a period start, an advisory quote)
#[derive(Debug, Clone)]
pub struct BlockBundle {
    pub block: UnpackedBlock,
    pub cycle: Option<crate::cycle::CycleBundle>,
    pub constants: Option<crate::protocol::ProtocolConstants>,
    pub voter_listings: Option<Vec<crate::voting::VoterListing>>,
    pub quote: Option<crate::quote::Quote>,
}

impl BlockBundle {
    pub fn plain(block: UnpackedBlock) -> Self {
        Self {
            block,
            cycle: None,
            constants: None,
            voter_listings: None,
            quote: None,
        }
    }
}

/// Persisted block row
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub level: Level,
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    pub timestamp: i64,
    pub proto_code: i32,
    pub baker_id: AccountId,
    pub priority: i32,
    pub validation_passes: i32,
    /// Baker reward frozen by this block
    pub reward: Mutez,
    /// Fees collected from the block's manager operations
    pub fees: Mutez,
    /// Security deposit frozen by this block
    pub deposit: Mutez,
    pub operations: OperationsMask,
    pub cycle: CycleIndex,
    pub cycle_position: i32,
    pub voting_period_index: PeriodIndex,
    pub voting_period_position: i32,
    pub seed_nonce_hash: Option<String>,
    pub lb_escape_vote: Option<bool>,
    pub lb_escape_ema: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_mask_composes() {
        let mut mask = OperationsMask::none();
        mask |= OperationsMask::Transactions;
        mask |= OperationsMask::Endorsements;
        assert!(mask.contains(OperationsMask::Transactions));
        assert!(!mask.contains(OperationsMask::Ballots));
        let bits = u32::from(mask);
        assert_eq!(OperationsMask::from(bits), mask);
    }
}
