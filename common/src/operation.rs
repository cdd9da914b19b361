//! Operations - the tagged union over every indexed operation kind
//!
//! Every payload persists enough to reconstruct its inverse without
//! consulting external state: prior delegate ids, computed rewards and
//! losses, allocation flags. Revert must compose with apply to identity.

use crate::address::OpHash;
use crate::voting::Ballot;
use crate::{AccountId, CycleIndex, Level, Mutez, OpId, PeriodIndex};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Operation kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Transaction,
    Origination,
    Delegation,
    Reveal,
    Endorsement,
    Proposals,
    Ballot,
    DoubleBaking,
    DoubleEndorsing,
    NonceRevelation,
    Activation,
    Migration,
    RegisterConstant,
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpKind::Transaction => "transaction",
            OpKind::Origination => "origination",
            OpKind::Delegation => "delegation",
            OpKind::Reveal => "reveal",
            OpKind::Endorsement => "endorsement",
            OpKind::Proposals => "proposals",
            OpKind::Ballot => "ballot",
            OpKind::DoubleBaking => "double_baking_evidence",
            OpKind::DoubleEndorsing => "double_endorsement_evidence",
            OpKind::NonceRevelation => "seed_nonce_revelation",
            OpKind::Activation => "activate_account",
            OpKind::Migration => "migration",
            OpKind::RegisterConstant => "register_global_constant",
        };
        write!(f, "{name}")
    }
}

/// Node-reported application status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpStatus {
    Applied,
    Failed,
    Backtracked,
    Skipped,
}

impl OpStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, OpStatus::Applied)
    }
}

impl From<OpStatus> for u8 {
    fn from(s: OpStatus) -> u8 {
        match s {
            OpStatus::Applied => 0,
            OpStatus::Failed => 1,
            OpStatus::Backtracked => 2,
            OpStatus::Skipped => 3,
        }
    }
}

impl TryFrom<u8> for OpStatus {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<OpStatus> {
        match v {
            0 => Ok(OpStatus::Applied),
            1 => Ok(OpStatus::Failed),
            2 => Ok(OpStatus::Backtracked),
            3 => Ok(OpStatus::Skipped),
            n => anyhow::bail!("Impossible operation status {n}"),
        }
    }
}

/// Synthetic migration kinds; report type is `11 + kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationKind {
    Bootstrap = 0,
    ActivateDelegate = 1,
    Airdrop = 2,
    ProposalInvoice = 3,
    CodeChange = 4,
    ImplicitOrigination = 5,
    Subsidy = 6,
}

impl From<MigrationKind> for u8 {
    fn from(k: MigrationKind) -> u8 {
        k as u8
    }
}

impl TryFrom<u8> for MigrationKind {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<MigrationKind> {
        match v {
            0 => Ok(MigrationKind::Bootstrap),
            1 => Ok(MigrationKind::ActivateDelegate),
            2 => Ok(MigrationKind::Airdrop),
            3 => Ok(MigrationKind::ProposalInvoice),
            4 => Ok(MigrationKind::CodeChange),
            5 => Ok(MigrationKind::ImplicitOrigination),
            6 => Ok(MigrationKind::Subsidy),
            n => anyhow::bail!("Impossible migration kind {n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOp {
    pub target_id: Option<AccountId>,
    pub amount: Mutez,
    /// Entrypoint name when calling a contract
    pub entrypoint: Option<String>,
    /// Call parameters, canonical JSON text
    pub parameters: Option<String>,
    /// Target row was allocated by this transaction (reverting deletes it)
    pub allocated_target: bool,
    /// Nonce of an internal operation, None for the outer one
    pub internal_nonce: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginationOp {
    /// Id of the contract account this origination allocated
    pub contract_id: AccountId,
    pub delegate_id: Option<AccountId>,
    /// Balance moved from the originator into the new contract
    pub balance: Mutez,
    pub script: Option<String>,
    pub storage: Option<String>,
    pub internal_nonce: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationOp {
    pub new_delegate_id: Option<AccountId>,
    /// Delegate before this operation; restored exactly on revert
    pub prev_delegate_id: Option<AccountId>,
    /// Sender registered itself as a delegate
    pub registered_delegate: bool,
    pub internal_nonce: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealOp {
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndorsementOp {
    /// Level being endorsed (the predecessor)
    pub endorsed_level: Level,
    pub slots: i32,
    /// Reward and deposit frozen by this endorsement, for exact revert
    pub reward: Mutez,
    pub deposit: Mutez,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalsOp {
    pub period_index: PeriodIndex,
    pub proposal_id: i64,
    /// Voting power counted for this upvote
    pub rolls: i32,
    /// Repeated upvote of the same proposal by the same sender in the period
    pub duplicated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotOp {
    pub period_index: PeriodIndex,
    pub proposal_id: i64,
    pub vote: Ballot,
    pub rolls: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleBakingOp {
    pub accused_level: Level,
    pub offender_id: AccountId,
    pub accuser_id: AccountId,
    /// Amounts moved by the accusation, stored per pool for reversibility
    pub offender_lost_deposits: Mutez,
    pub offender_lost_rewards: Mutez,
    pub offender_lost_fees: Mutez,
    pub accuser_reward: Mutez,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleEndorsingOp {
    pub accused_level: Level,
    pub offender_id: AccountId,
    pub accuser_id: AccountId,
    pub offender_lost_deposits: Mutez,
    pub offender_lost_rewards: Mutez,
    pub offender_lost_fees: Mutez,
    pub accuser_reward: Mutez,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceRevelationOp {
    /// Baker credited with the revelation tip (the block baker)
    pub baker_id: AccountId,
    /// Level whose committed nonce is being revealed
    pub revealed_level: Level,
    pub reward: Mutez,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationOp {
    /// Bootstrap allocation credited to the activated account
    pub balance: Mutez,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOp {
    pub kind: MigrationKind,
    pub balance_change: Mutez,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConstantOp {
    /// Global address of the registered constant (expr...)
    pub global_address: String,
    /// Registered expression, canonical JSON text
    pub expression: String,
    pub storage_used: i64,
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpPayload {
    Transaction(TransactionOp),
    Origination(OriginationOp),
    Delegation(DelegationOp),
    Reveal(RevealOp),
    Endorsement(EndorsementOp),
    Proposals(ProposalsOp),
    Ballot(BallotOp),
    DoubleBaking(DoubleBakingOp),
    DoubleEndorsing(DoubleEndorsingOp),
    NonceRevelation(NonceRevelationOp),
    Activation(ActivationOp),
    Migration(MigrationOp),
    RegisterConstant(RegisterConstantOp),
}

impl OpPayload {
    pub fn kind(&self) -> OpKind {
        match self {
            OpPayload::Transaction(_) => OpKind::Transaction,
            OpPayload::Origination(_) => OpKind::Origination,
            OpPayload::Delegation(_) => OpKind::Delegation,
            OpPayload::Reveal(_) => OpKind::Reveal,
            OpPayload::Endorsement(_) => OpKind::Endorsement,
            OpPayload::Proposals(_) => OpKind::Proposals,
            OpPayload::Ballot(_) => OpKind::Ballot,
            OpPayload::DoubleBaking(_) => OpKind::DoubleBaking,
            OpPayload::DoubleEndorsing(_) => OpKind::DoubleEndorsing,
            OpPayload::NonceRevelation(_) => OpKind::NonceRevelation,
            OpPayload::Activation(_) => OpKind::Activation,
            OpPayload::Migration(_) => OpKind::Migration,
            OpPayload::RegisterConstant(_) => OpKind::RegisterConstant,
        }
    }
}

/// One persisted operation row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OpId,
    pub level: Level,
    pub cycle: CycleIndex,
    pub timestamp: i64,
    /// Hash of the operation group; internals share the outer hash,
    /// synthetic migrations have none
    pub hash: Option<OpHash>,
    pub sender_id: AccountId,
    pub status: OpStatus,
    /// Node-reported errors, JSON text
    pub errors: Option<String>,
    pub baker_fee: Mutez,
    pub storage_fee: Mutez,
    pub allocation_fee: Mutez,
    /// Manager counter consumed by this operation
    pub counter: Option<i64>,
    pub payload: OpPayload,
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    /// Total fees debited from the sender even when the operation failed
    pub fn total_fees(&self) -> Mutez {
        self.baker_fee + self.storage_fee + self.allocation_fee
    }

    pub fn is_internal(&self) -> bool {
        match &self.payload {
            OpPayload::Transaction(t) => t.internal_nonce.is_some(),
            OpPayload::Origination(o) => o.internal_nonce.is_some(),
            OpPayload::Delegation(d) => d.internal_nonce.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            OpStatus::Applied,
            OpStatus::Failed,
            OpStatus::Backtracked,
            OpStatus::Skipped,
        ] {
            assert_eq!(OpStatus::try_from(u8::from(s)).unwrap(), s);
        }
    }

    #[test]
    fn migration_kind_report_type_offset() {
        // Report type is 11 + kind
        assert_eq!(11 + u8::from(MigrationKind::Bootstrap), 11);
        assert_eq!(11 + u8::from(MigrationKind::Subsidy), 17);
    }

    #[test]
    fn internal_flag_follows_nonce() {
        let payload = OpPayload::Transaction(TransactionOp {
            target_id: Some(2),
            amount: 1,
            entrypoint: None,
            parameters: None,
            allocated_target: false,
            internal_nonce: Some(0),
        });
        let op = Operation {
            id: 1,
            level: 1,
            cycle: 0,
            timestamp: 0,
            hash: None,
            sender_id: 1,
            status: OpStatus::Applied,
            errors: None,
            baker_fee: 0,
            storage_fee: 0,
            allocation_fee: 0,
            counter: None,
            payload,
        };
        assert!(op.is_internal());
        assert_eq!(op.kind(), OpKind::Transaction);
    }
}
