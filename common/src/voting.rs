//! Voting - periods, proposals, ballots and voter snapshots

use crate::address::ProposalHash;
use crate::{AccountId, Level, PeriodIndex};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Phase of the protocol-amendment epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodKind {
    Proposal,
    Exploration,
    Cooldown,
    Promotion,
    Adoption,
}

impl From<PeriodKind> for u8 {
    fn from(k: PeriodKind) -> u8 {
        match k {
            PeriodKind::Proposal => 0,
            PeriodKind::Exploration => 1,
            PeriodKind::Cooldown => 2,
            PeriodKind::Promotion => 3,
            PeriodKind::Adoption => 4,
        }
    }
}

impl TryFrom<u8> for PeriodKind {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<PeriodKind> {
        match v {
            0 => Ok(PeriodKind::Proposal),
            1 => Ok(PeriodKind::Exploration),
            2 => Ok(PeriodKind::Cooldown),
            3 => Ok(PeriodKind::Promotion),
            4 => Ok(PeriodKind::Adoption),
            n => anyhow::bail!("Impossible period kind {n}"),
        }
    }
}

impl Display for PeriodKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome of a finished period; Active while in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodStatus {
    Active,
    /// Advanced to the next phase
    Success,
    NoProposals,
    NoQuorum,
    NoSupermajority,
}

impl From<PeriodStatus> for u8 {
    fn from(s: PeriodStatus) -> u8 {
        match s {
            PeriodStatus::Active => 0,
            PeriodStatus::Success => 1,
            PeriodStatus::NoProposals => 2,
            PeriodStatus::NoQuorum => 3,
            PeriodStatus::NoSupermajority => 4,
        }
    }
}

impl TryFrom<u8> for PeriodStatus {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<PeriodStatus> {
        match v {
            0 => Ok(PeriodStatus::Active),
            1 => Ok(PeriodStatus::Success),
            2 => Ok(PeriodStatus::NoProposals),
            3 => Ok(PeriodStatus::NoQuorum),
            4 => Ok(PeriodStatus::NoSupermajority),
            n => anyhow::bail!("Impossible period status {n}"),
        }
    }
}

/// Ballot choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ballot {
    Yay,
    Nay,
    Pass,
}

impl From<Ballot> for u8 {
    fn from(b: Ballot) -> u8 {
        match b {
            Ballot::Yay => 0,
            Ballot::Nay => 1,
            Ballot::Pass => 2,
        }
    }
}

impl TryFrom<u8> for Ballot {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<Ballot> {
        match v {
            0 => Ok(Ballot::Yay),
            1 => Ok(Ballot::Nay),
            2 => Ok(Ballot::Pass),
            n => anyhow::bail!("Impossible ballot {n}"),
        }
    }
}

/// What a snapshotted voter did during its period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoterStatus {
    None,
    Upvoted,
    VotedYay,
    VotedNay,
    VotedPass,
}

impl From<VoterStatus> for u8 {
    fn from(s: VoterStatus) -> u8 {
        match s {
            VoterStatus::None => 0,
            VoterStatus::Upvoted => 1,
            VoterStatus::VotedYay => 2,
            VoterStatus::VotedNay => 3,
            VoterStatus::VotedPass => 4,
        }
    }
}

impl TryFrom<u8> for VoterStatus {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<VoterStatus> {
        match v {
            0 => Ok(VoterStatus::None),
            1 => Ok(VoterStatus::Upvoted),
            2 => Ok(VoterStatus::VotedYay),
            3 => Ok(VoterStatus::VotedNay),
            4 => Ok(VoterStatus::VotedPass),
            n => anyhow::bail!("Impossible voter status {n}"),
        }
    }
}

impl From<Ballot> for VoterStatus {
    fn from(b: Ballot) -> VoterStatus {
        match b {
            Ballot::Yay => VoterStatus::VotedYay,
            Ballot::Nay => VoterStatus::VotedNay,
            Ballot::Pass => VoterStatus::VotedPass,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Active,
    Accepted,
    Rejected,
    /// Lost the proposal period to a better-supported proposal
    Skipped,
}

impl From<ProposalStatus> for u8 {
    fn from(s: ProposalStatus) -> u8 {
        match s {
            ProposalStatus::Active => 0,
            ProposalStatus::Accepted => 1,
            ProposalStatus::Rejected => 2,
            ProposalStatus::Skipped => 3,
        }
    }
}

impl TryFrom<u8> for ProposalStatus {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<ProposalStatus> {
        match v {
            0 => Ok(ProposalStatus::Active),
            1 => Ok(ProposalStatus::Accepted),
            2 => Ok(ProposalStatus::Rejected),
            3 => Ok(ProposalStatus::Skipped),
            n => anyhow::bail!("Impossible proposal status {n}"),
        }
    }
}

/// Voter row from the node's `votes/listings`, used to seed period snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterListing {
    pub pkh: crate::address::Address,
    pub rolls: i32,
}

/// One voting period; created when its predecessor ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingPeriod {
    pub index: PeriodIndex,
    /// Amendment epoch this period belongs to
    pub epoch: i32,
    pub kind: PeriodKind,
    pub first_level: Level,
    pub last_level: Level,
    pub status: PeriodStatus,
    /// Upvotes of the best-supported proposal so far (proposal periods)
    pub top_upvotes: i32,
    /// Rolls of the best-supported proposal so far (proposal periods)
    pub top_rolls: i32,
    /// Distinct proposals pushed during this period
    pub proposals_count: i32,
    /// Total rolls in the period snapshot
    pub total_rolls: i32,
    /// Ballot tallies in rolls (exploration/promotion periods)
    pub yay_rolls: i32,
    pub nay_rolls: i32,
    pub pass_rolls: i32,
    /// Participation quorum required to pass, fixed-point over 10 000
    pub ballot_quorum: Option<i32>,
    /// Participation EMA carried across ballot periods, fixed-point over 10 000
    pub participation_ema: Option<i32>,
}

/// A protocol-amendment proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: i64,
    pub hash: ProposalHash,
    pub epoch: i32,
    pub first_period: PeriodIndex,
    pub last_period: PeriodIndex,
    /// Account that pushed the proposal first
    pub initiator_id: AccountId,
    pub upvotes: i32,
    pub rolls: i32,
    pub status: ProposalStatus,
}

/// Voter row frozen at the first block of a period; only status mutates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSnapshot {
    pub period_index: PeriodIndex,
    pub baker_id: AccountId,
    pub rolls: i32,
    pub status: VoterStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_encodings_round_trip() {
        for k in [
            PeriodKind::Proposal,
            PeriodKind::Exploration,
            PeriodKind::Cooldown,
            PeriodKind::Promotion,
            PeriodKind::Adoption,
        ] {
            assert_eq!(PeriodKind::try_from(u8::from(k)).unwrap(), k);
        }
        for b in [Ballot::Yay, Ballot::Nay, Ballot::Pass] {
            assert_eq!(Ballot::try_from(u8::from(b)).unwrap(), b);
        }
        for s in [
            VoterStatus::None,
            VoterStatus::Upvoted,
            VoterStatus::VotedYay,
            VoterStatus::VotedNay,
            VoterStatus::VotedPass,
        ] {
            assert_eq!(VoterStatus::try_from(u8::from(s)).unwrap(), s);
        }
    }

    #[test]
    fn ballot_maps_to_voter_status() {
        assert_eq!(VoterStatus::from(Ballot::Yay), VoterStatus::VotedYay);
        assert_eq!(VoterStatus::from(Ballot::Pass), VoterStatus::VotedPass);
    }
}
