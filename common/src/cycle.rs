//! Cycles, rights, roll snapshots and frozen balances

use crate::{AccountId, CycleIndex, Level, Mutez};
use serde::{Deserialize, Serialize};

/// One cycle - populated before it begins, finalized at its end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub index: CycleIndex,
    pub first_level: Level,
    pub last_level: Level,
    /// Which of the blocks_per_cycle / blocks_per_snapshot candidates was chosen
    pub snapshot_index: i32,
    pub snapshot_level: Level,
    pub total_rolls: i32,
    pub total_staking: Mutez,
    pub selected_bakers: i32,
    /// Cycle seed, hex
    pub seed: String,
}

/// Lifecycle of a precomputed right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RightStatus {
    Future,
    Realized,
    /// Right existed but its holder could not cover the deposit
    Uncovered,
    Missed,
}

impl From<RightStatus> for u8 {
    fn from(s: RightStatus) -> u8 {
        match s {
            RightStatus::Future => 0,
            RightStatus::Realized => 1,
            RightStatus::Uncovered => 2,
            RightStatus::Missed => 3,
        }
    }
}

impl TryFrom<u8> for RightStatus {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<RightStatus> {
        match v {
            0 => Ok(RightStatus::Future),
            1 => Ok(RightStatus::Realized),
            2 => Ok(RightStatus::Uncovered),
            3 => Ok(RightStatus::Missed),
            n => anyhow::bail!("Impossible right status {n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakingRight {
    pub cycle: CycleIndex,
    pub level: Level,
    pub baker_id: AccountId,
    pub priority: i32,
    pub status: RightStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsingRight {
    pub cycle: CycleIndex,
    pub level: Level,
    pub baker_id: AccountId,
    pub slots: i32,
    pub status: RightStatus,
}

/// Delegate weight captured by the cycle's roll snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateSnapshot {
    pub cycle: CycleIndex,
    pub baker_id: AccountId,
    pub rolls: i32,
    pub staking_balance: Mutez,
    pub delegators_count: i32,
}

/// Per-cycle frozen pools of one baker; unfrozen_at marks the release level
/// so that unfreeze and its revert are exact inverses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenBalance {
    pub cycle: CycleIndex,
    pub baker_id: AccountId,
    pub deposits: Mutez,
    pub rewards: Mutez,
    pub fees: Mutez,
    pub unfrozen_at: Option<Level>,
}

/// Baking right as reported by the node, baker still unresolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBakingRight {
    pub level: Level,
    pub baker: crate::address::Address,
    pub priority: i32,
}

/// Endorsing right as reported by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEndorsingRight {
    pub level: Level,
    pub baker: crate::address::Address,
    pub slots: i32,
}

/// Cycle side data the controller prefetches before the cycle's first block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleBundle {
    pub cycle: CycleIndex,
    pub snapshot_index: i32,
    pub snapshot_level: Level,
    /// Hex seed
    pub seed: String,
    pub baking_rights: Vec<RawBakingRight>,
    pub endorsing_rights: Vec<RawEndorsingRight>,
}

/// Seed nonce committed by a baked block, awaiting revelation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceCommitment {
    /// Level of the committing block
    pub level: Level,
    pub cycle: CycleIndex,
    pub baker_id: AccountId,
    pub hash: String,
    pub revealed_at: Option<Level>,
    /// Confiscated at cycle end when never revealed; kept for exact revert
    pub penalty_rewards: Mutez,
    pub penalty_fees: Mutez,
    pub penalized_at: Option<Level>,
}
