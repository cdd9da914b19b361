//! End-to-end engine scenarios: apply/revert symmetry over realistic blocks

use tessera_common::{
    Address, BlockBundle, BlockHash, Level, ManagerMeta, OpHash, OpPayload, OpStatus,
    ProposalHash, ProtocolConstants, ProtocolHash, UnpackedBlock, UnpackedContent, UnpackedGroup,
    ValidationPass, VoterListing, VoterStatus,
    voting::{Ballot, PeriodStatus},
};
use tessera_module_protocol_engine::ProtocolEngine;
use tessera_module_state_store::Store;

const CARTHAGE: &str = "PsCARTHAGazKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQEb";
const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const BLOCK_BASE: &str = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45";
const OP_BASE: &str = "ooPMQcQYa6HykEGJRVJPrG7iG5nnWBoobGsGYYUvMeGv8UhGPRT2";
const PROPOSAL_BASE: &str = "PsCARTHAGazKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQ";

fn suffix(n: i64) -> String {
    let a = ALPHABET[(n as usize / ALPHABET.len()) % ALPHABET.len()] as char;
    let b = ALPHABET[n as usize % ALPHABET.len()] as char;
    format!("{a}{b}")
}

fn block_hash(level: Level) -> BlockHash {
    BlockHash::new(format!("{BLOCK_BASE}{}", suffix(level))).unwrap()
}

fn op_hash(n: i64) -> OpHash {
    OpHash::new(format!("{OP_BASE}{}", suffix(n))).unwrap()
}

fn proposal_hash(n: i64) -> ProposalHash {
    ProposalHash::new(format!("{PROPOSAL_BASE}{}", suffix(n))).unwrap()
}

fn addr(i: usize) -> Address {
    let a = ALPHABET[33 + (i / 25) % 25] as char;
    let b = ALPHABET[33 + i % 25] as char;
    Address::new(format!("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZ{a}{b}")).unwrap()
}

const BAKER: usize = 600;

struct Harness {
    engine: ProtocolEngine,
    constants: ProtocolConstants,
}

impl Harness {
    fn new() -> Self {
        Self::with_constants(ProtocolConstants::default())
    }

    fn with_constants(constants: ProtocolConstants) -> Self {
        let engine = ProtocolEngine::new(Store::in_memory().unwrap(), 1).unwrap();
        Self { engine, constants }
    }

    fn make_block(&self, baker: usize, groups: Vec<UnpackedGroup>) -> UnpackedBlock {
        let level = self.engine.app_state().level + 1;
        let c = &self.constants;
        let proto = ProtocolHash::new(CARTHAGE).unwrap();
        UnpackedBlock {
            hash: block_hash(level),
            level,
            predecessor: block_hash(level - 1),
            timestamp: 1_600_000_000 + level * c.time_between_blocks,
            protocol: proto.clone(),
            next_protocol: proto,
            baker: addr(baker),
            priority: 0,
            cycle: ((level - 1) / c.blocks_per_cycle as Level) as i32,
            cycle_position: ((level - 1) % c.blocks_per_cycle as Level) as i32,
            voting_period_index: ((level - 1) / c.blocks_per_voting_period as Level) as i32,
            voting_period_position: ((level - 1) % c.blocks_per_voting_period as Level) as i32,
            seed_nonce_hash: None,
            lb_escape_vote: None,
            groups,
        }
    }

    fn apply(&mut self, groups: Vec<UnpackedGroup>) {
        self.apply_full(BAKER, groups, None);
    }

    fn apply_baked_by(&mut self, baker: usize, groups: Vec<UnpackedGroup>) {
        self.apply_full(baker, groups, None);
    }

    fn apply_full(
        &mut self,
        baker: usize,
        groups: Vec<UnpackedGroup>,
        listings: Option<Vec<VoterListing>>,
    ) {
        let block = self.make_block(baker, groups);
        let bundle = BlockBundle {
            block,
            cycle: None,
            constants: Some(self.constants.clone()),
            voter_listings: listings,
            quote: None,
        };
        self.engine.apply_block(&bundle).unwrap();
    }

    fn revert(&mut self) {
        self.engine.revert_block().unwrap();
    }

    fn store(&self) -> &Store {
        self.engine.store()
    }

    fn account(&self, i: usize) -> tessera_common::Account {
        self.store().account_by_address(addr(i).as_str()).unwrap().unwrap()
    }
}

fn anonymous_group(n: i64, contents: Vec<UnpackedContent>) -> UnpackedGroup {
    UnpackedGroup {
        hash: op_hash(n),
        pass: ValidationPass::Anonymous,
        contents,
    }
}

fn manager_group(n: i64, contents: Vec<UnpackedContent>) -> UnpackedGroup {
    UnpackedGroup {
        hash: op_hash(n),
        pass: ValidationPass::Manager,
        contents,
    }
}

fn voting_group(n: i64, contents: Vec<UnpackedContent>) -> UnpackedGroup {
    UnpackedGroup {
        hash: op_hash(n),
        pass: ValidationPass::Voting,
        contents,
    }
}

fn activation(account: usize, balance: i64) -> UnpackedContent {
    UnpackedContent::Activation {
        account: addr(account),
        balance,
    }
}

fn meta(status: OpStatus, fee: i64, counter: i64) -> ManagerMeta {
    ManagerMeta {
        status,
        errors: None,
        fee,
        counter,
    }
}

fn transfer(
    source: usize,
    destination: usize,
    amount: i64,
    fee: i64,
    counter: i64,
    status: OpStatus,
) -> UnpackedContent {
    UnpackedContent::Transaction {
        source: addr(source),
        meta: meta(status, fee, counter),
        amount,
        destination: addr(destination),
        entrypoint: None,
        parameters: None,
        allocated_destination: false,
        paid_storage_diff: 0,
        internals: Vec::new(),
    }
}

fn delegation(source: usize, delegate: Option<usize>, counter: i64) -> UnpackedContent {
    UnpackedContent::Delegation {
        source: addr(source),
        meta: meta(OpStatus::Applied, 0, counter),
        delegate: delegate.map(addr),
    }
}

// ------------------------------------------------------------------ scenarios

/// S1: a single applied transfer moves amount plus fee
#[test]
fn single_transfer() {
    let mut h = Harness::new();
    h.apply(vec![anonymous_group(1, vec![activation(1, 1_000_000)])]);
    h.apply(vec![manager_group(
        2,
        vec![transfer(1, 2, 500_000, 1_000, 1, OpStatus::Applied)],
    )]);

    let a = h.account(1);
    let b = h.account(2);
    assert_eq!(a.balance, 499_000);
    assert_eq!(a.counter, 1);
    assert_eq!(a.counts.transactions, 1);
    assert_eq!(b.balance, 500_000);
    assert_eq!(b.counts.transactions, 1);
    assert_eq!(h.engine.app_state().level, 2);

    let ops = h.store().operations_at_level(2).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OpStatus::Applied);
    assert!(matches!(ops[0].payload, OpPayload::Transaction(_)));
}

/// S2: a failed transfer still charges the baker fee
#[test]
fn failed_transfer_charges_fee() {
    let mut h = Harness::new();
    h.apply(vec![anonymous_group(1, vec![activation(1, 1_000_000)])]);
    h.apply(vec![manager_group(
        2,
        vec![transfer(1, 2, 500_000, 1_000, 1, OpStatus::Failed)],
    )]);

    let a = h.account(1);
    let b = h.account(2);
    assert_eq!(a.balance, 999_000);
    assert_eq!(a.counts.transactions, 1);
    assert_eq!(b.balance, 0);
}

/// S3: moving a delegation shifts the whole stake between delegates
#[test]
fn delegation_switch() {
    let mut h = Harness::new();
    h.apply(vec![anonymous_group(1, vec![activation(10, 5_000)])]);
    h.apply(vec![
        manager_group(2, vec![delegation(11, Some(11), 1)]),
        manager_group(3, vec![delegation(12, Some(12), 1)]),
        manager_group(4, vec![delegation(10, Some(11), 1)]),
    ]);

    let x = h.account(11);
    assert_eq!(x.delegate().unwrap().staking_balance, 5_000);
    assert_eq!(x.delegate().unwrap().delegators_count, 1);

    h.apply(vec![manager_group(5, vec![delegation(10, Some(12), 2)])]);

    let d = h.account(10);
    let x = h.account(11);
    let y = h.account(12);
    assert_eq!(x.delegate().unwrap().staking_balance, 0);
    assert_eq!(x.delegate().unwrap().delegators_count, 0);
    assert_eq!(y.delegate().unwrap().staking_balance, 5_000);
    assert_eq!(y.delegate().unwrap().delegators_count, 1);
    assert_eq!(d.delegate_id, Some(y.id));

    // Revert restores the previous delegate exactly
    h.revert();
    let d = h.account(10);
    let x = h.account(11);
    let y = h.account(12);
    assert_eq!(x.delegate().unwrap().staking_balance, 5_000);
    assert_eq!(x.delegate().unwrap().delegators_count, 1);
    assert_eq!(y.delegate().unwrap().staking_balance, 0);
    assert_eq!(d.delegate_id, Some(x.id));
}

/// S4: repeated upvotes of the same proposal are marked duplicated
#[test]
fn proposal_duplicates() {
    let mut h = Harness::new();
    h.apply_full(
        BAKER,
        vec![],
        Some(vec![VoterListing {
            pkh: addr(20),
            rolls: 7,
        }]),
    );

    let p1 = proposal_hash(1);
    let p2 = proposal_hash(2);
    let p3 = proposal_hash(3);
    h.apply(vec![
        voting_group(
            10,
            vec![UnpackedContent::Proposals {
                source: addr(20),
                period: 0,
                proposals: vec![p1.clone(), p2.clone()],
            }],
        ),
        voting_group(
            11,
            vec![UnpackedContent::Proposals {
                source: addr(20),
                period: 0,
                proposals: vec![p1.clone(), p3.clone()],
            }],
        ),
    ]);

    let proposals = h.store().proposals_of_epoch(0).unwrap();
    assert_eq!(proposals.len(), 3);
    for proposal in &proposals {
        assert_eq!(proposal.upvotes, 1, "proposal {} upvoted once", proposal.hash);
        assert_eq!(proposal.rolls, 7);
    }

    let period = h.store().period_at(0).unwrap().unwrap();
    assert_eq!(period.proposals_count, 3);
    assert_eq!(period.top_rolls, 7);

    let ops = h.store().operations_at_level(2).unwrap();
    let duplicated: Vec<_> = ops
        .iter()
        .filter_map(|op| match &op.payload {
            OpPayload::Proposals(p) if p.duplicated => Some(p.proposal_id),
            _ => None,
        })
        .collect();
    let p1_id = proposals.iter().find(|p| p.hash == p1).unwrap().id;
    assert_eq!(duplicated, vec![p1_id]);

    let baker20 = h.account(20);
    let snapshot = h.store().voting_snapshot(0, baker20.id).unwrap().unwrap();
    assert_eq!(snapshot.status, VoterStatus::Upvoted);

    // Full revert of the voting block leaves no trace
    h.revert();
    assert!(h.store().proposals_of_epoch(0).unwrap().is_empty());
    let period = h.store().period_at(0).unwrap().unwrap();
    assert_eq!(period.proposals_count, 0);
    assert_eq!(period.top_rolls, 0);
    let snapshot = h.store().voting_snapshot(0, baker20.id).unwrap().unwrap();
    assert_eq!(snapshot.status, VoterStatus::None);
}

/// S5-style: revert then apply an alternative block equals applying the
/// alternative directly
#[test]
fn revert_and_reapply_matches_direct_apply() {
    let mut reorged = Harness::new();
    reorged.apply(vec![anonymous_group(1, vec![activation(1, 1_000_000)])]);
    reorged.apply(vec![manager_group(
        2,
        vec![transfer(1, 2, 500_000, 1_000, 1, OpStatus::Applied)],
    )]);
    reorged.revert();
    reorged.apply(vec![manager_group(
        3,
        vec![transfer(1, 2, 300_000, 2_000, 1, OpStatus::Applied)],
    )]);

    let mut direct = Harness::new();
    direct.apply(vec![anonymous_group(1, vec![activation(1, 1_000_000)])]);
    direct.apply(vec![manager_group(
        3,
        vec![transfer(1, 2, 300_000, 2_000, 1, OpStatus::Applied)],
    )]);

    assert_eq!(
        reorged.store().accounts().unwrap(),
        direct.store().accounts().unwrap()
    );
    assert_eq!(
        reorged.engine.app_state().next_operation_id,
        direct.engine.app_state().next_operation_id
    );
}

/// S6: a double-baking accusation wipes the offender's frozen pools and
/// rewards the accuser with half the deposit; revert restores both sides
#[test]
fn double_baking_penalty() {
    const OFFENDER: usize = 30;
    let mut h = Harness::new();
    let constants = h.constants.clone();

    h.apply(vec![]);
    h.apply_baked_by(OFFENDER, vec![]);

    let offender = h.account(OFFENDER);
    let frozen = h.store().frozen(0, offender.id).unwrap().unwrap();
    assert_eq!(frozen.deposits, constants.block_deposit);
    assert_eq!(frozen.rewards, constants.block_reward);

    h.apply(vec![anonymous_group(
        5,
        vec![UnpackedContent::DoubleBaking {
            accused_level: 2,
            offender: addr(OFFENDER),
        }],
    )]);

    let offender = h.account(OFFENDER);
    assert!(h.store().frozen(0, offender.id).unwrap().is_none());
    assert_eq!(offender.delegate().unwrap().frozen_deposits, 0);
    assert_eq!(offender.delegate().unwrap().frozen_rewards, 0);

    let accuser = h.account(BAKER);
    let expected_reward = constants.block_reward * 2 + constants.block_deposit / 2;
    assert_eq!(accuser.delegate().unwrap().frozen_rewards, expected_reward);

    h.revert();
    let offender = h.account(OFFENDER);
    let frozen = h.store().frozen(0, offender.id).unwrap().unwrap();
    assert_eq!(frozen.deposits, constants.block_deposit);
    assert_eq!(frozen.rewards, constants.block_reward);
    let accuser = h.account(BAKER);
    assert_eq!(
        accuser.delegate().unwrap().frozen_rewards,
        constants.block_reward
    );
}

// ------------------------------------------------------- universal properties

/// Apply then revert is identity on the account table, per operation kind
#[test]
fn apply_revert_identity_over_mixed_block() {
    let mut h = Harness::new();
    h.apply(vec![anonymous_group(
        1,
        vec![activation(1, 2_000_000), activation(2, 500_000)],
    )]);
    h.apply(vec![manager_group(2, vec![delegation(40, Some(40), 1)])]);

    let before = h.store().accounts().unwrap();
    let before_ops = h.engine.app_state().next_operation_id;

    h.apply(vec![
        manager_group(
            3,
            vec![
                UnpackedContent::Reveal {
                    source: addr(1),
                    meta: meta(OpStatus::Applied, 300, 1),
                    public_key: "edpkuBknW28nW72KG6RoH".into(),
                },
                transfer(1, 2, 100_000, 400, 2, OpStatus::Applied),
            ],
        ),
        manager_group(4, vec![delegation(2, Some(40), 1)]),
        manager_group(5, vec![transfer(2, 3, 77, 10, 2, OpStatus::Backtracked)]),
    ]);
    h.revert();

    assert_eq!(h.store().accounts().unwrap(), before);
    assert_eq!(h.engine.app_state().next_operation_id, before_ops);
    assert!(h.store().operations_at_level(3).unwrap().is_empty());
}

/// Monotone level and operation-id density over a contiguous apply run
#[test]
fn levels_and_op_ids_advance_in_lockstep() {
    let mut h = Harness::new();
    let start_ops = h.engine.app_state().next_operation_id;
    let mut inserted = 0i64;

    h.apply(vec![anonymous_group(1, vec![activation(1, 9_000_000)])]);
    inserted += 1;
    for i in 0..4 {
        h.apply(vec![manager_group(
            10 + i,
            vec![transfer(1, 2, 1_000, 100, i + 1, OpStatus::Applied)],
        )]);
        inserted += 1;
        assert_eq!(h.engine.app_state().level, 2 + i);
    }
    assert_eq!(h.engine.app_state().next_operation_id, start_ops + inserted);
}

/// Cycle end releases the matured cycle's frozen pools into spendable
/// balance, and revert takes them back
#[test]
fn cycle_unfreeze_round_trip() {
    let constants = ProtocolConstants {
        blocks_per_cycle: 4,
        blocks_per_voting_period: 8,
        preserved_cycles: 1,
        blocks_per_commitment: 4,
        blocks_per_snapshot: 2,
        ..ProtocolConstants::default()
    };
    let mut h = Harness::with_constants(constants.clone());

    // Two full cycles baked by the same delegate
    for _ in 0..8 {
        h.apply(vec![]);
    }

    let baker = h.account(BAKER);
    let per_block = constants.block_deposit + constants.block_reward;
    // Cycle 0 matured at the end of cycle 1
    assert_eq!(baker.balance, per_block * 4);
    let frozen0 = h.store().frozen(0, baker.id).unwrap().unwrap();
    assert_eq!(frozen0.unfrozen_at, Some(8));

    h.revert();
    let baker = h.account(BAKER);
    assert_eq!(baker.balance, 0);
    let frozen0 = h.store().frozen(0, baker.id).unwrap().unwrap();
    assert_eq!(frozen0.unfrozen_at, None);
    assert_eq!(frozen0.deposits, constants.block_deposit * 4);
}

/// An empty proposal period restarts the epoch; revert reopens it
#[test]
fn voting_period_rollover_round_trip() {
    let constants = ProtocolConstants {
        blocks_per_cycle: 8,
        blocks_per_voting_period: 4,
        ..ProtocolConstants::default()
    };
    let mut h = Harness::with_constants(constants);

    for _ in 0..4 {
        h.apply(vec![]);
    }

    let finished = h.store().period_at(0).unwrap().unwrap();
    assert_eq!(finished.status, PeriodStatus::NoProposals);
    let next = h.store().period_at(1).unwrap().unwrap();
    assert_eq!(next.epoch, 1);
    assert_eq!(h.engine.app_state().voting_epoch, 1);

    h.revert();
    let reopened = h.store().period_at(0).unwrap().unwrap();
    assert_eq!(reopened.status, PeriodStatus::Active);
    assert!(h.store().period_at(1).unwrap().is_none());
    assert_eq!(h.engine.app_state().voting_epoch, 0);
}

/// Ballots tally into the period by snapshot rolls
#[test]
fn ballots_tally_rolls() {
    let mut h = Harness::new();
    h.apply_full(
        BAKER,
        vec![],
        Some(vec![
            VoterListing {
                pkh: addr(20),
                rolls: 7,
            },
            VoterListing {
                pkh: addr(21),
                rolls: 3,
            },
        ]),
    );
    let p1 = proposal_hash(1);
    h.apply(vec![voting_group(
        10,
        vec![UnpackedContent::Proposals {
            source: addr(20),
            period: 0,
            proposals: vec![p1.clone()],
        }],
    )]);

    // Ballots usually live in exploration periods; the tallies themselves
    // are period-agnostic, which is what this exercises
    h.apply(vec![
        voting_group(
            11,
            vec![UnpackedContent::Ballot {
                source: addr(20),
                period: 0,
                proposal: p1.clone(),
                vote: Ballot::Yay,
            }],
        ),
        voting_group(
            12,
            vec![UnpackedContent::Ballot {
                source: addr(21),
                period: 0,
                proposal: p1,
                vote: Ballot::Nay,
            }],
        ),
    ]);

    let period = h.store().period_at(0).unwrap().unwrap();
    assert_eq!(period.yay_rolls, 7);
    assert_eq!(period.nay_rolls, 3);

    h.revert();
    let period = h.store().period_at(0).unwrap().unwrap();
    assert_eq!(period.yay_rolls, 0);
    assert_eq!(period.nay_rolls, 0);
}

/// A proposal from a baker outside the snapshot is a validation failure
#[test]
fn proposal_without_snapshot_is_rejected() {
    let mut h = Harness::new();
    h.apply_full(BAKER, vec![], Some(vec![]));

    let block = h.make_block(
        BAKER,
        vec![voting_group(
            10,
            vec![UnpackedContent::Proposals {
                source: addr(55),
                period: 0,
                proposals: vec![proposal_hash(9)],
            }],
        )],
    );
    let bundle = BlockBundle::plain(block);
    let err = h.engine.apply_block(&bundle).unwrap_err();
    assert!(matches!(err, tessera_common::IndexError::Validation(_)));
    // The failed attempt left no partial state behind
    assert_eq!(h.engine.app_state().level, 1);
    assert!(h.store().operations_at_level(2).unwrap().is_empty());
}
