//! Protocol handler registry
//!
//! One handler per protocol, expressed as a method table of apply/revert
//! function pointers plus a rules record. Later protocols inherit by
//! copying the previous table and overriding only what changed - no
//! class hierarchy, just structural reuse.

use tessera_common::{
    IndexError, Mutez, OpKind, Operation, PeriodKind, ProtocolConstants, ProtocolHash,
    UnpackedContent,
};

use crate::commits;
use crate::context::BlockCtx;

pub type ApplyFn = fn(&mut BlockCtx, &mut Operation, &UnpackedContent) -> Result<(), IndexError>;
pub type RevertFn = fn(&mut BlockCtx, &Operation) -> Result<(), IndexError>;

/// Forward and inverse transition of one operation kind
#[derive(Clone, Copy, Debug)]
pub struct OpCommit {
    pub apply: ApplyFn,
    pub revert: RevertFn,
}

/// Method table - one commit per operation kind the protocol declares
#[derive(Clone, Copy, Debug)]
pub struct OpTable {
    pub transaction: OpCommit,
    pub origination: OpCommit,
    pub delegation: OpCommit,
    pub reveal: OpCommit,
    pub endorsement: OpCommit,
    pub proposals: OpCommit,
    pub ballot: OpCommit,
    pub double_baking: OpCommit,
    pub double_endorsing: OpCommit,
    pub nonce_revelation: OpCommit,
    pub activation: OpCommit,
    pub migration: OpCommit,
    /// Proto-11 onwards
    pub register_constant: Option<OpCommit>,
}

/// Per-protocol behavior that is data, not code
#[derive(Clone, Copy, Debug)]
pub struct ProtocolRules {
    /// Periods of one amendment epoch, in order
    pub voting_periods: &'static [PeriodKind],
    pub block_reward: fn(&ProtocolConstants, priority: i32) -> Mutez,
    pub endorsement_reward: fn(&ProtocolConstants, priority: i32, slots: i32) -> Mutez,
    /// Proto-10 onwards: per-block subsidy and escape EMA
    pub liquidity_baking: bool,
    /// CPMM contract credited with the subsidy
    pub lb_subsidy_target: Option<&'static str>,
}

#[derive(Clone, Copy, Debug)]
pub struct Handler {
    pub rules: ProtocolRules,
    pub table: OpTable,
}

impl Handler {
    /// Commit for an operation kind, or a validation failure when the
    /// protocol does not declare it
    pub fn commit_for(&self, kind: OpKind) -> Result<OpCommit, IndexError> {
        let commit = match kind {
            OpKind::Transaction => self.table.transaction,
            OpKind::Origination => self.table.origination,
            OpKind::Delegation => self.table.delegation,
            OpKind::Reveal => self.table.reveal,
            OpKind::Endorsement => self.table.endorsement,
            OpKind::Proposals => self.table.proposals,
            OpKind::Ballot => self.table.ballot,
            OpKind::DoubleBaking => self.table.double_baking,
            OpKind::DoubleEndorsing => self.table.double_endorsing,
            OpKind::NonceRevelation => self.table.nonce_revelation,
            OpKind::Activation => self.table.activation,
            OpKind::Migration => self.table.migration,
            OpKind::RegisterConstant => {
                return self.table.register_constant.ok_or_else(|| {
                    IndexError::Validation(tessera_common::ValidationError::UnknownOpKind {
                        kind: kind.to_string(),
                        path: "operations".into(),
                    })
                })
            }
        };
        Ok(commit)
    }
}

const FOUR_PERIODS: [PeriodKind; 4] = [
    PeriodKind::Proposal,
    PeriodKind::Exploration,
    PeriodKind::Cooldown,
    PeriodKind::Promotion,
];

const FIVE_PERIODS: [PeriodKind; 5] = [
    PeriodKind::Proposal,
    PeriodKind::Exploration,
    PeriodKind::Cooldown,
    PeriodKind::Promotion,
    PeriodKind::Adoption,
];

fn base_block_reward(constants: &ProtocolConstants, priority: i32) -> Mutez {
    constants.block_reward / (priority as i64 + 1)
}

fn base_endorsement_reward(constants: &ProtocolConstants, priority: i32, slots: i32) -> Mutez {
    constants.endorsement_reward * slots as i64 / (priority as i64 + 1)
}

/// Proto-6 flattened the priority penalty: full pay at priority zero,
/// two thirds otherwise
fn v6_block_reward(constants: &ProtocolConstants, priority: i32) -> Mutez {
    if priority == 0 {
        constants.block_reward
    } else {
        constants.block_reward * 2 / 3
    }
}

fn v6_endorsement_reward(constants: &ProtocolConstants, priority: i32, slots: i32) -> Mutez {
    let full = constants.endorsement_reward * slots as i64;
    if priority == 0 {
        full
    } else {
        full * 2 / 3
    }
}

/// Proto 1-5 semantics
fn base() -> Handler {
    Handler {
        rules: ProtocolRules {
            voting_periods: &FOUR_PERIODS,
            block_reward: base_block_reward,
            endorsement_reward: base_endorsement_reward,
            liquidity_baking: false,
            lb_subsidy_target: None,
        },
        table: OpTable {
            transaction: OpCommit {
                apply: commits::transaction::apply,
                revert: commits::transaction::revert,
            },
            origination: OpCommit {
                apply: commits::origination::apply,
                revert: commits::origination::revert,
            },
            delegation: OpCommit {
                apply: commits::delegation::apply,
                revert: commits::delegation::revert,
            },
            reveal: OpCommit {
                apply: commits::reveal::apply,
                revert: commits::reveal::revert,
            },
            endorsement: OpCommit {
                apply: commits::endorsement::apply,
                revert: commits::endorsement::revert,
            },
            proposals: OpCommit {
                apply: commits::voting::apply_proposals,
                revert: commits::voting::revert_proposals,
            },
            ballot: OpCommit {
                apply: commits::voting::apply_ballot,
                revert: commits::voting::revert_ballot,
            },
            double_baking: OpCommit {
                apply: commits::accusation::apply_double_baking,
                revert: commits::accusation::revert_double_baking,
            },
            double_endorsing: OpCommit {
                apply: commits::accusation::apply_double_endorsing,
                revert: commits::accusation::revert_double_endorsing,
            },
            nonce_revelation: OpCommit {
                apply: commits::anonymous::apply_nonce_revelation,
                revert: commits::anonymous::revert_nonce_revelation,
            },
            activation: OpCommit {
                apply: commits::anonymous::apply_activation,
                revert: commits::anonymous::revert_activation,
            },
            migration: OpCommit {
                apply: commits::migration::apply,
                revert: commits::migration::revert,
            },
            register_constant: None,
        },
    }
}

/// Proto-6: new reward formulas
fn carthage() -> Handler {
    let mut handler = base();
    handler.rules.block_reward = v6_block_reward;
    handler.rules.endorsement_reward = v6_endorsement_reward;
    handler
}

/// Proto-8: adoption period joins the epoch
fn edo() -> Handler {
    let mut handler = carthage();
    handler.rules.voting_periods = &FIVE_PERIODS;
    handler
}

/// Proto-10: liquidity baking subsidy
fn granada() -> Handler {
    let mut handler = edo();
    handler.rules.liquidity_baking = true;
    handler.rules.lb_subsidy_target = Some("KT1TxqZ8QtKvLu3V3JH7Gx58n7Co8pgtpQU5");
    handler
}

/// Proto-11: global constants
fn hangzhou() -> Handler {
    let mut handler = granada();
    handler.table.register_constant = Some(OpCommit {
        apply: commits::register_constant::apply,
        revert: commits::register_constant::revert,
    });
    handler
}

/// Maps protocol hash prefixes to handlers
pub struct HandlerRegistry {
    entries: Vec<(&'static str, Handler)>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl HandlerRegistry {
    pub fn mainnet() -> Self {
        Self {
            entries: vec![
                ("PrihK96n", base()), // genesis
                ("PtYuensg", base()), // genesis bootstrap
                ("PtCJ7pwo", base()),
                ("PsYLVpVv", base()),
                ("PsddFKi3", base()),
                ("Pt24m4xi", base()),
                ("PsBabyM1", base()),
                ("PsCARTHA", carthage()),
                ("PsDELPH1", carthage()),
                ("PtEdo2Zk", edo()),
                ("PsFLoren", edo()),
                ("PtGRANAD", granada()),
                ("PtHangz2", hangzhou()),
            ],
        }
    }

    pub fn resolve(&self, hash: &ProtocolHash) -> Result<&Handler, IndexError> {
        self.entries
            .iter()
            .find(|(prefix, _)| hash.as_str().starts_with(prefix))
            .map(|(_, handler)| handler)
            .ok_or_else(|| IndexError::UnknownProtocol {
                hash: hash.as_str().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_protocols_resolve_unknown_are_fatal() {
        let registry = HandlerRegistry::mainnet();
        let carthage_hash =
            ProtocolHash::new("PsCARTHAGazKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQEb").unwrap();
        assert!(registry.resolve(&carthage_hash).is_ok());

        let bogus =
            ProtocolHash::new("PzzzzzzzzzKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQEb1").unwrap();
        let err = registry.resolve(&bogus).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn inheritance_overrides_only_what_changed() {
        let base = base();
        let v6 = carthage();
        let constants = ProtocolConstants::default();

        // Rewards changed
        assert_ne!(
            (base.rules.endorsement_reward)(&constants, 1, 3),
            (v6.rules.endorsement_reward)(&constants, 1, 3)
        );
        // Voting layout did not
        assert_eq!(base.rules.voting_periods.len(), v6.rules.voting_periods.len());
        // Edo adds the adoption period
        assert_eq!(edo().rules.voting_periods.len(), 5);
        // Register-constant arrives in Hangzhou
        assert!(granada().table.register_constant.is_none());
        assert!(hangzhou().table.register_constant.is_some());
    }

    #[test]
    fn reward_formulas_follow_priority() {
        let constants = ProtocolConstants::default();
        assert_eq!(base_block_reward(&constants, 0), constants.block_reward);
        assert_eq!(base_block_reward(&constants, 1), constants.block_reward / 2);
        assert_eq!(
            base_endorsement_reward(&constants, 0, 2),
            constants.endorsement_reward * 2
        );
        assert_eq!(v6_block_reward(&constants, 2), constants.block_reward * 2 / 3);
        assert_eq!(
            v6_endorsement_reward(&constants, 0, 2),
            constants.endorsement_reward * 2
        );
    }
}
