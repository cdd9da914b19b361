//! The amendment-epoch state machine
//!
//! Explicit transition function over the period kinds declared by the
//! protocol rules; side effects (proposal statuses, epoch bumps, period
//! rows) are carried out by the engine from the returned outcome.

use tessera_common::{math, PeriodKind, PeriodStatus, ProtocolConstants, VotingPeriod};

/// What happens when a period's last block is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodOutcome {
    /// Move to the next phase of the same epoch
    Advance(PeriodKind),
    /// Final phase passed: the winning proposal is accepted and a fresh
    /// epoch opens with a proposal period
    Complete,
    /// Phase failed; the epoch is abandoned and a fresh one opens
    Restart(PeriodStatus),
}

impl PeriodOutcome {
    /// Status recorded on the finished period
    pub fn status(&self) -> PeriodStatus {
        match self {
            PeriodOutcome::Advance(_) | PeriodOutcome::Complete => PeriodStatus::Success,
            PeriodOutcome::Restart(status) => *status,
        }
    }
}

pub fn transition(
    period: &VotingPeriod,
    constants: &ProtocolConstants,
    periods: &'static [PeriodKind],
) -> PeriodOutcome {
    let position = periods.iter().position(|k| *k == period.kind).unwrap_or(0);
    let next = periods.get(position + 1).copied();

    match period.kind {
        PeriodKind::Proposal => {
            if period.proposals_count == 0 {
                return PeriodOutcome::Restart(PeriodStatus::NoProposals);
            }
            if !math::meets(
                period.top_rolls as i64,
                period.total_rolls as i64,
                constants.proposal_quorum,
            ) {
                return PeriodOutcome::Restart(PeriodStatus::NoQuorum);
            }
            advance_or_complete(next)
        }
        PeriodKind::Exploration | PeriodKind::Promotion => {
            let cast = period.yay_rolls + period.nay_rolls + period.pass_rolls;
            let quorum = period.ballot_quorum.unwrap_or(constants.quorum_min);
            if !math::meets(cast as i64, period.total_rolls as i64, quorum) {
                return PeriodOutcome::Restart(PeriodStatus::NoQuorum);
            }
            if !math::meets(
                period.yay_rolls as i64,
                (period.yay_rolls + period.nay_rolls) as i64,
                constants.supermajority,
            ) {
                return PeriodOutcome::Restart(PeriodStatus::NoSupermajority);
            }
            advance_or_complete(next)
        }
        // Waiting phases always pass
        PeriodKind::Cooldown | PeriodKind::Adoption => advance_or_complete(next),
    }
}

fn advance_or_complete(next: Option<PeriodKind>) -> PeriodOutcome {
    match next {
        Some(kind) => PeriodOutcome::Advance(kind),
        None => PeriodOutcome::Complete,
    }
}

/// Participation quorum for the next ballot period, interpolated between
/// the protocol's bounds by the participation EMA
pub fn quorum_for(constants: &ProtocolConstants, participation_ema: i32) -> i32 {
    let span = (constants.quorum_max - constants.quorum_min) as i64;
    constants.quorum_min + (span * participation_ema as i64 / math::SCALE as i64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE: [PeriodKind; 5] = [
        PeriodKind::Proposal,
        PeriodKind::Exploration,
        PeriodKind::Cooldown,
        PeriodKind::Promotion,
        PeriodKind::Adoption,
    ];
    const FOUR: [PeriodKind; 4] = [
        PeriodKind::Proposal,
        PeriodKind::Exploration,
        PeriodKind::Cooldown,
        PeriodKind::Promotion,
    ];

    fn period(kind: PeriodKind) -> VotingPeriod {
        VotingPeriod {
            index: 10,
            epoch: 2,
            kind,
            first_level: 1,
            last_level: 100,
            status: PeriodStatus::Active,
            top_upvotes: 0,
            top_rolls: 0,
            proposals_count: 0,
            total_rolls: 1000,
            yay_rolls: 0,
            nay_rolls: 0,
            pass_rolls: 0,
            ballot_quorum: Some(3000),
            participation_ema: Some(5000),
        }
    }

    #[test]
    fn empty_proposal_period_restarts() {
        let constants = ProtocolConstants::default();
        let outcome = transition(&period(PeriodKind::Proposal), &constants, &FIVE);
        assert_eq!(outcome, PeriodOutcome::Restart(PeriodStatus::NoProposals));
    }

    #[test]
    fn proposal_below_quorum_restarts_above_advances() {
        let constants = ProtocolConstants::default(); // proposal_quorum = 500 (5%)
        let mut p = period(PeriodKind::Proposal);
        p.proposals_count = 1;
        p.top_rolls = 40; // 4% of 1000
        assert_eq!(
            transition(&p, &constants, &FIVE),
            PeriodOutcome::Restart(PeriodStatus::NoQuorum)
        );
        p.top_rolls = 50; // exactly 5%
        assert_eq!(
            transition(&p, &constants, &FIVE),
            PeriodOutcome::Advance(PeriodKind::Exploration)
        );
    }

    #[test]
    fn ballot_periods_check_quorum_then_supermajority() {
        let constants = ProtocolConstants::default();
        let mut p = period(PeriodKind::Exploration);

        // 20% participation < 30% quorum
        p.yay_rolls = 150;
        p.nay_rolls = 30;
        p.pass_rolls = 20;
        assert_eq!(
            transition(&p, &constants, &FIVE),
            PeriodOutcome::Restart(PeriodStatus::NoQuorum)
        );

        // Quorum met but 7/10 yay < 8/10 supermajority
        p.yay_rolls = 210;
        p.nay_rolls = 90;
        p.pass_rolls = 0;
        assert_eq!(
            transition(&p, &constants, &FIVE),
            PeriodOutcome::Restart(PeriodStatus::NoSupermajority)
        );

        // Both met
        p.yay_rolls = 280;
        p.nay_rolls = 20;
        assert_eq!(
            transition(&p, &constants, &FIVE),
            PeriodOutcome::Advance(PeriodKind::Cooldown)
        );
    }

    #[test]
    fn passes_count_toward_quorum_not_supermajority() {
        let constants = ProtocolConstants::default();
        let mut p = period(PeriodKind::Promotion);
        // 300 cast meets 30% quorum; yay/(yay+nay) = 80/100 passes exactly
        p.yay_rolls = 80;
        p.nay_rolls = 20;
        p.pass_rolls = 200;
        assert_eq!(
            transition(&p, &constants, &FIVE),
            PeriodOutcome::Advance(PeriodKind::Adoption)
        );
    }

    #[test]
    fn last_period_completes_the_epoch() {
        let constants = ProtocolConstants::default();
        assert_eq!(
            transition(&period(PeriodKind::Adoption), &constants, &FIVE),
            PeriodOutcome::Complete
        );
        // Four-period protocols complete at promotion
        let mut p = period(PeriodKind::Promotion);
        p.yay_rolls = 300;
        assert_eq!(transition(&p, &constants, &FOUR), PeriodOutcome::Complete);
    }

    #[test]
    fn quorum_interpolates_between_bounds() {
        let constants = ProtocolConstants::default(); // min 2000, max 7000
        assert_eq!(quorum_for(&constants, 0), 2000);
        assert_eq!(quorum_for(&constants, 10_000), 7000);
        assert_eq!(quorum_for(&constants, 5_000), 4500);
    }
}
