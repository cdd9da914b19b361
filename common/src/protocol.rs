//! Protocols and their constants

use crate::address::ProtocolHash;
use crate::{Level, Mutez};
use serde::{Deserialize, Serialize};

/// One protocol row; last_level is sealed when superseded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// Small sequential code (0 = genesis)
    pub code: i32,
    pub hash: ProtocolHash,
    pub first_level: Level,
    pub last_level: Option<Level>,
    pub constants: ProtocolConstants,
}

/// Constants fetched from `context/constants`, micro-units and fixed-point
/// fractions over 10 000
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConstants {
    pub preserved_cycles: i32,
    pub blocks_per_cycle: i32,
    pub blocks_per_commitment: i32,
    pub blocks_per_snapshot: i32,
    pub blocks_per_voting_period: i32,
    pub endorsers_per_block: i32,
    /// Seconds
    pub time_between_blocks: i64,
    pub block_deposit: Mutez,
    pub endorsement_deposit: Mutez,
    pub block_reward: Mutez,
    pub endorsement_reward: Mutez,
    /// Bytes charged for an originated contract
    pub origination_size: i32,
    /// Cost per storage byte
    pub byte_cost: Mutez,
    pub seed_nonce_revelation_tip: Mutez,
    pub tokens_per_roll: Mutez,
    /// Fraction of total rolls a proposal needs to advance
    pub proposal_quorum: i32,
    pub quorum_min: i32,
    pub quorum_max: i32,
    /// yay / (yay + nay) required on ballots
    pub supermajority: i32,
    /// Per-block liquidity baking subsidy (Proto-10+)
    pub lb_subsidy: Mutez,
    pub lb_escape_ema_threshold: i64,
}

impl Default for ProtocolConstants {
    fn default() -> Self {
        Self {
            preserved_cycles: 5,
            blocks_per_cycle: 4096,
            blocks_per_commitment: 32,
            blocks_per_snapshot: 256,
            blocks_per_voting_period: 32_768,
            endorsers_per_block: 32,
            time_between_blocks: 60,
            block_deposit: 512_000_000,
            endorsement_deposit: 64_000_000,
            block_reward: 16_000_000,
            endorsement_reward: 2_000_000,
            origination_size: 257,
            byte_cost: 1_000,
            seed_nonce_revelation_tip: 125_000,
            tokens_per_roll: 8_000_000_000,
            proposal_quorum: 500,
            quorum_min: 2_000,
            quorum_max: 7_000,
            supermajority: 8_000,
            lb_subsidy: 2_500_000,
            lb_escape_ema_threshold: 647_000,
        }
    }
}

impl ProtocolConstants {
    /// First level of the given cycle (levels start at 1)
    pub fn cycle_start(&self, cycle: i32) -> Level {
        cycle as Level * self.blocks_per_cycle as Level + 1
    }

    /// Last level of the given cycle
    pub fn cycle_end(&self, cycle: i32) -> Level {
        (cycle as Level + 1) * self.blocks_per_cycle as Level
    }

    /// Cycle containing the given level
    pub fn cycle_of(&self, level: Level) -> i32 {
        ((level - 1) / self.blocks_per_cycle as Level) as i32
    }

    /// Rolls for a staking balance
    pub fn rolls_of(&self, staking_balance: Mutez) -> i32 {
        if staking_balance <= 0 {
            0
        } else {
            (staking_balance / self.tokens_per_roll) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_layout_is_consistent() {
        let c = ProtocolConstants::default();
        assert_eq!(c.cycle_start(0), 1);
        assert_eq!(c.cycle_end(0), 4096);
        assert_eq!(c.cycle_start(1), 4097);
        assert_eq!(c.cycle_of(1), 0);
        assert_eq!(c.cycle_of(4096), 0);
        assert_eq!(c.cycle_of(4097), 1);
        for level in [1, 4096, 4097, 100_000] {
            let cycle = c.cycle_of(level);
            assert!(c.cycle_start(cycle) <= level && level <= c.cycle_end(cycle));
        }
    }

    #[test]
    fn rolls_floor_the_staking_balance() {
        let c = ProtocolConstants::default();
        assert_eq!(c.rolls_of(0), 0);
        assert_eq!(c.rolls_of(c.tokens_per_roll - 1), 0);
        assert_eq!(c.rolls_of(c.tokens_per_roll), 1);
        assert_eq!(c.rolls_of(c.tokens_per_roll * 7 + 5), 7);
        assert_eq!(c.rolls_of(-5), 0);
    }
}
