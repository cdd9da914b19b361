//! The protocol engine proper: advances and rewinds the indexed state one
//! block at a time, inside one store transaction per block

use crate::commits;
use crate::context::BlockCtx;
use crate::cycles;
use crate::registry::{Handler, HandlerRegistry};
use crate::voting_machine::{self, PeriodOutcome};
use std::collections::BTreeSet;
use tessera_common::{
    AccountId, AppState, BlockBundle, BlockRow, IndexError, InternalContent, Level, ManagerMeta,
    NonceCommitment, OpPayload, OpStatus, Operation, OperationsMask, PeriodKind, PeriodStatus,
    ProposalStatus, Protocol, UnpackedBlock, UnpackedContent, ValidationError,
    VotingPeriod, VotingSnapshot, math,
    operation::{
        ActivationOp, BallotOp, DelegationOp, DoubleBakingOp, DoubleEndorsingOp, EndorsementOp,
        MigrationKind, MigrationOp, NonceRevelationOp, OriginationOp, ProposalsOp,
        RegisterConstantOp, RevealOp, TransactionOp,
    },
    voting::VoterStatus,
};
use tessera_module_state_store::{EntityCache, Store};
use tracing::{debug, info};

/// Liquidity-baking escape EMA scale and per-step decay
const LB_EMA_UNIT: i64 = 1_000_000;
const LB_EMA_WINDOW: i64 = 2_000;

/// Default participation EMA before any ballot period completed
const INITIAL_PARTICIPATION_EMA: i32 = 5_000;

pub struct ProtocolEngine {
    store: Store,
    cache: EntityCache,
    registry: HandlerRegistry,
    start_level: Level,
}

impl ProtocolEngine {
    pub fn new(store: Store, start_level: Level) -> Result<Self, IndexError> {
        let app = store.app_state()?.unwrap_or_else(|| AppState::bootstrap(start_level));
        info!(level = app.level, "Engine starting from indexed head");
        Ok(Self {
            store,
            cache: EntityCache::new(app),
            registry: HandlerRegistry::mainnet(),
            start_level,
        })
    }

    pub fn app_state(&self) -> &AppState {
        self.cache.app_state()
    }

    pub fn start_level(&self) -> Level {
        self.start_level
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Apply the next block; on any failure the transaction rolls back and
    /// the cache drops whatever the attempt touched
    pub fn apply_block(&mut self, bundle: &BlockBundle) -> Result<(), IndexError> {
        let result = apply_inner(&mut self.store, &mut self.cache, &self.registry, bundle);
        if result.is_err() {
            self.recover()?;
        }
        result
    }

    /// Revert the current head; returns the new head level
    pub fn revert_block(&mut self) -> Result<Level, IndexError> {
        let result = revert_inner(
            &mut self.store,
            &mut self.cache,
            &self.registry,
            self.start_level,
        );
        if result.is_err() {
            self.recover()?;
        }
        result
    }

    fn recover(&mut self) -> Result<(), IndexError> {
        let durable =
            self.store.app_state()?.unwrap_or_else(|| AppState::bootstrap(self.start_level));
        self.cache.invalidate(durable);
        Ok(())
    }
}

fn apply_inner(
    store: &mut Store,
    cache: &mut EntityCache,
    registry: &HandlerRegistry,
    bundle: &BlockBundle,
) -> Result<(), IndexError> {
    let block = &bundle.block;
    let app = cache.app_state().clone();

    if block.level != app.level + 1 {
        return Err(IndexError::Validation(ValidationError::HeaderMismatch {
            level: block.level,
            reason: format!("expected level {}", app.level + 1),
        }));
    }
    if let Some(head) = &app.hash {
        if *head != block.predecessor {
            return Err(IndexError::Validation(ValidationError::HeaderMismatch {
                level: block.level,
                reason: format!("predecessor {} does not extend head {head}", block.predecessor),
            }));
        }
    }
    if app.timestamp > 0 && block.timestamp < app.timestamp {
        return Err(IndexError::Validation(ValidationError::HeaderMismatch {
            level: block.level,
            reason: "timestamp regression".into(),
        }));
    }

    let tx = store.begin()?;

    // Protocol bookkeeping: first encounter inserts the row and seals the
    // predecessor's last level
    let protocol = match tx.protocol_by_hash(&block.protocol)? {
        Some(protocol) => protocol,
        None => {
            let previous = tx.current_protocol()?;
            let code = previous.as_ref().map(|p| p.code + 1).unwrap_or(0);
            if let Some(mut previous) = previous {
                previous.last_level = Some(block.level - 1);
                tx.upsert_protocol(&previous)?;
            }
            let constants = bundle.constants.clone().unwrap_or_default();
            let protocol = Protocol {
                code,
                hash: block.protocol.clone(),
                first_level: block.level,
                last_level: None,
                constants,
            };
            tx.upsert_protocol(&protocol)?;
            info!(code, hash = %protocol.hash, "New protocol");
            protocol
        }
    };
    let handler = registry.resolve(&block.protocol)?;
    let constants = protocol.constants.clone();

    let mut row = BlockRow {
        level: block.level,
        hash: block.hash.clone(),
        predecessor: block.predecessor.clone(),
        timestamp: block.timestamp,
        proto_code: protocol.code,
        baker_id: 0,
        priority: block.priority,
        validation_passes: 4,
        reward: 0,
        fees: 0,
        deposit: 0,
        operations: OperationsMask::none(),
        cycle: block.cycle,
        cycle_position: block.cycle_position,
        voting_period_index: block.voting_period_index,
        voting_period_position: block.voting_period_position,
        seed_nonce_hash: block.seed_nonce_hash.clone(),
        lb_escape_vote: block.lb_escape_vote,
        lb_escape_ema: None,
    };

    {
        let mut ctx = BlockCtx {
            tx: &tx,
            cache,
            constants: &constants,
            rules: &handler.rules,
            block: &mut row,
        };
        ctx.block.baker_id = ctx.resolve_delegate(&block.baker)?;

        // Pre-apply phase
        if block.cycle_position == 0 {
            if let Some(cycle_bundle) = &bundle.cycle {
                cycles::begin_cycle(&mut ctx, cycle_bundle)?;
            }
        }
        if block.voting_period_position == 0 {
            begin_period(&mut ctx, bundle)?;
        }
        if let Some(nonce_hash) = &block.seed_nonce_hash {
            ctx.tx.upsert_nonce(&NonceCommitment {
                level: block.level,
                cycle: block.cycle,
                baker_id: ctx.block.baker_id,
                hash: nonce_hash.clone(),
                revealed_at: None,
                penalty_rewards: 0,
                penalty_fees: 0,
                penalized_at: None,
            })?;
        }

        // Operation phase, in node-reported order
        let drafts = build_drafts(&mut ctx, block)?;
        for (mut op, content) in drafts {
            let commit = handler.commit_for(op.kind())?;
            (commit.apply)(&mut ctx, &mut op, &content)?;
            ctx.tx.insert_operation(&op)?;
        }

        // Baker accounting needs the final fee total
        commits::baking::apply(&mut ctx)?;

        // Post-apply phase
        if block.voting_period_position == constants.blocks_per_voting_period - 1 {
            end_period(&mut ctx)?;
        }
        if block.cycle_position == constants.blocks_per_cycle - 1 {
            cycles::end_cycle(&mut ctx)?;
        }
        if handler.rules.liquidity_baking {
            liquidity_baking(&mut ctx, handler)?;
        }
        if let Some(quote) = &bundle.quote {
            ctx.tx.upsert_quote(quote)?;
        }

        tx.insert_block(ctx.block)?;
    }

    {
        let app = cache.app_state_mut();
        app.level = block.level;
        app.hash = Some(block.hash.clone());
        app.protocol = Some(block.protocol.clone());
        app.timestamp = block.timestamp;
        app.known_head = app.known_head.max(block.level);
    }
    cache.flush(&tx)?;
    tx.commit()?;
    cache.confirm();

    if block.level % 100 == 0 {
        info!(level = block.level, "Applied block");
    } else {
        debug!(level = block.level, ops = block.groups.len(), "Applied block");
    }
    Ok(())
}

fn revert_inner(
    store: &mut Store,
    cache: &mut EntityCache,
    registry: &HandlerRegistry,
    start_level: Level,
) -> Result<Level, IndexError> {
    let level = cache.app_state().level;
    if level < start_level {
        return Err(IndexError::corruption(format!(
            "cannot revert below the indexed genesis at {start_level}"
        )));
    }

    let tx = store.begin()?;
    let row = tx
        .block_at(level)?
        .ok_or_else(|| IndexError::corruption(format!("head block {level} missing")))?;

    let protocols = tx.protocols()?;
    let protocol = protocols
        .iter()
        .find(|p| p.code == row.proto_code)
        .ok_or_else(|| IndexError::corruption(format!("protocol {} missing", row.proto_code)))?;
    let handler = registry.resolve(&protocol.hash)?;
    let constants = protocol.constants.clone();

    let mut touched: BTreeSet<AccountId> = BTreeSet::new();
    let mut row_mut = row.clone();
    {
        let mut ctx = BlockCtx {
            tx: &tx,
            cache,
            constants: &constants,
            rules: &handler.rules,
            block: &mut row_mut,
        };

        // Post-apply inverses first, in reverse of the apply order
        ctx.tx.delete_quote(level)?;
        if row.cycle_position == constants.blocks_per_cycle - 1 {
            cycles::revert_end_cycle(&mut ctx)?;
        }
        if row.voting_period_position == constants.blocks_per_voting_period - 1 {
            revert_end_period(&mut ctx)?;
        }

        // Operations in exact reverse order
        let ops = tx.operations_at_level(level)?;
        for op in ops.iter().rev() {
            let commit = handler.commit_for(op.kind())?;
            (commit.revert)(&mut ctx, op)?;
            ctx.tx.delete_operation(op.kind(), op.id)?;
            ctx.cache.app_state_mut().release_op_id(op.id);
            collect_touched(op, &mut touched);
        }

        commits::baking::revert(&mut ctx)?;
        touched.insert(row.baker_id);

        // Pre-apply inverses
        if row.seed_nonce_hash.is_some() {
            ctx.tx.delete_nonce(level)?;
        }
        if row.voting_period_position == 0 {
            ctx.tx.delete_voting_snapshots(row.voting_period_index)?;
            if tx.block_at(level - 1)?.is_none() {
                // This block opened the period itself (bootstrap)
                ctx.tx.delete_period(row.voting_period_index)?;
                ctx.cache.drop_period(row.voting_period_index);
            } else if let Some(period) =
                ctx.cache.period_mut(ctx.tx, row.voting_period_index)?
            {
                period.total_rolls = 0;
            }
        }
        if row.cycle_position == 0 {
            cycles::revert_begin_cycle(&mut ctx, row.cycle)?;
        }
    }

    // Protocol-change inverse: unseal the predecessor, drop the new row
    if protocol.first_level == level && protocol.code > 0 {
        let code = protocol.code;
        tx.delete_protocol(code)?;
        if let Some(previous) = protocols.iter().find(|p| p.code == code - 1) {
            let mut previous = previous.clone();
            previous.last_level = None;
            tx.upsert_protocol(&previous)?;
        }
    }

    tx.delete_block(level)?;

    // Accounts born in this block with nothing left behind disappear
    for id in tx.fresh_account_ids(level)? {
        tx.delete_account(id)?;
        cache.drop_account(id);
        cache.app_state_mut().release_acct_id(id);
        touched.remove(&id);
    }

    // Last-activity repair for everything the block had touched
    for id in touched {
        let Some(account) = cache.account_mut(&tx, id)? else { continue };
        let floor = account.first_level;
        let last = tx.last_activity_of(id)?.unwrap_or(floor).max(floor);
        account.last_level = last;
    }

    let previous = tx.block_at(level - 1)?;
    {
        let app = cache.app_state_mut();
        app.level = level - 1;
        app.hash = Some(row.predecessor.clone());
        app.timestamp = previous.as_ref().map(|p| p.timestamp).unwrap_or(0);
        if let Some(previous) = &previous {
            if let Some(prev_protocol) = protocols.iter().find(|p| p.code == previous.proto_code) {
                app.protocol = Some(prev_protocol.hash.clone());
            }
        }
    }
    cache.flush(&tx)?;
    tx.commit()?;
    cache.confirm();

    info!(level, "Reverted block");
    Ok(level - 1)
}

/// Common fields of every draft built for one block
struct DraftMeta {
    level: Level,
    cycle: tessera_common::CycleIndex,
    timestamp: i64,
}

/// Allocate the next operation id and stamp the shared columns
#[allow(clippy::too_many_arguments)]
fn make_op(
    ctx: &mut BlockCtx,
    meta: &DraftMeta,
    sender: AccountId,
    status: OpStatus,
    errors: Option<String>,
    fee: i64,
    counter: Option<i64>,
    hash: &tessera_common::OpHash,
    payload: OpPayload,
) -> Operation {
    let id = ctx.cache.app_state_mut().next_op_id();
    if let Some(counter) = counter {
        let app = ctx.cache.app_state_mut();
        app.manager_counter = app.manager_counter.max(counter);
    }
    Operation {
        id,
        level: meta.level,
        cycle: meta.cycle,
        timestamp: meta.timestamp,
        hash: Some(hash.clone()),
        sender_id: sender,
        status,
        errors,
        baker_fee: fee,
        storage_fee: 0,
        allocation_fee: 0,
        counter,
        payload,
    }
}

/// Flattens the block's groups into operation drafts in apply order,
/// allocating ids and resolving every referenced account
fn build_drafts(
    ctx: &mut BlockCtx,
    block: &UnpackedBlock,
) -> Result<Vec<(Operation, UnpackedContent)>, IndexError> {
    let mut drafts = Vec::new();
    let meta = DraftMeta {
        level: block.level,
        cycle: block.cycle,
        timestamp: block.timestamp,
    };
    let baker_id = ctx.block.baker_id;

    for group in &block.groups {
        for content in &group.contents {
            match content {
                UnpackedContent::Endorsement {
                    delegate,
                    slots,
                    endorsed_level,
                } => {
                    let sender = ctx.resolve_delegate(delegate)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        OpStatus::Applied,
                        None,
                        0,
                        None,
                        &group.hash,
                        OpPayload::Endorsement(EndorsementOp {
                            endorsed_level: *endorsed_level,
                            slots: *slots,
                            reward: 0,
                            deposit: 0,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::SeedNonceRevelation { revealed_level, .. } => {
                    let op = make_op(
                        ctx,
                        &meta,
                        baker_id,
                        OpStatus::Applied,
                        None,
                        0,
                        None,
                        &group.hash,
                        OpPayload::NonceRevelation(NonceRevelationOp {
                            baker_id,
                            revealed_level: *revealed_level,
                            reward: 0,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::Activation { account, balance } => {
                    let sender = ctx.resolve(account)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        OpStatus::Applied,
                        None,
                        0,
                        None,
                        &group.hash,
                        OpPayload::Activation(ActivationOp { balance: *balance }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::DoubleBaking { .. } => {
                    let op = make_op(
                        ctx,
                        &meta,
                        baker_id,
                        OpStatus::Applied,
                        None,
                        0,
                        None,
                        &group.hash,
                        OpPayload::DoubleBaking(DoubleBakingOp {
                            accused_level: 0,
                            offender_id: 0,
                            accuser_id: baker_id,
                            offender_lost_deposits: 0,
                            offender_lost_rewards: 0,
                            offender_lost_fees: 0,
                            accuser_reward: 0,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::DoubleEndorsing { .. } => {
                    let op = make_op(
                        ctx,
                        &meta,
                        baker_id,
                        OpStatus::Applied,
                        None,
                        0,
                        None,
                        &group.hash,
                        OpPayload::DoubleEndorsing(DoubleEndorsingOp {
                            accused_level: 0,
                            offender_id: 0,
                            accuser_id: baker_id,
                            offender_lost_deposits: 0,
                            offender_lost_rewards: 0,
                            offender_lost_fees: 0,
                            accuser_reward: 0,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::Proposals {
                    source,
                    period,
                    proposals,
                } => {
                    let sender = ctx.resolve(source)?;
                    // One row per pushed hash, all sharing the group hash
                    for hash in proposals {
                        let op = make_op(
                            ctx,
                            &meta,
                            sender,
                            OpStatus::Applied,
                            None,
                            0,
                            None,
                            &group.hash,
                            OpPayload::Proposals(ProposalsOp {
                                period_index: *period,
                                proposal_id: 0,
                                rolls: 0,
                                duplicated: false,
                            }),
                        );
                        let single = UnpackedContent::Proposals {
                            source: source.clone(),
                            period: *period,
                            proposals: vec![hash.clone()],
                        };
                        drafts.push((op, single));
                    }
                }
                UnpackedContent::Ballot {
                    source,
                    period,
                    vote,
                    ..
                } => {
                    let sender = ctx.resolve(source)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        OpStatus::Applied,
                        None,
                        0,
                        None,
                        &group.hash,
                        OpPayload::Ballot(BallotOp {
                            period_index: *period,
                            proposal_id: 0,
                            vote: *vote,
                            rolls: 0,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::Reveal {
                    source,
                    meta: manager_meta,
                    public_key,
                } => {
                    let sender = ctx.resolve(source)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        manager_meta.status,
                        manager_meta.errors.clone(),
                        manager_meta.fee,
                        Some(manager_meta.counter),
                        &group.hash,
                        OpPayload::Reveal(RevealOp {
                            public_key: public_key.clone(),
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::Transaction {
                    source,
                    meta: manager_meta,
                    amount,
                    destination,
                    entrypoint,
                    parameters,
                    internals,
                    ..
                } => {
                    let sender = ctx.resolve(source)?;
                    let target = ctx.resolve(destination)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        manager_meta.status,
                        manager_meta.errors.clone(),
                        manager_meta.fee,
                        Some(manager_meta.counter),
                        &group.hash,
                        OpPayload::Transaction(TransactionOp {
                            target_id: Some(target),
                            amount: *amount,
                            entrypoint: entrypoint.clone(),
                            parameters: parameters.clone(),
                            allocated_target: false,
                            internal_nonce: None,
                        }),
                    );
                    drafts.push((op, content.clone()));
                    build_internal_drafts(ctx, &meta, &mut drafts, &group.hash, internals)?;
                }
                UnpackedContent::Origination {
                    source,
                    meta: manager_meta,
                    balance,
                    internals,
                    ..
                } => {
                    let sender = ctx.resolve(source)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        manager_meta.status,
                        manager_meta.errors.clone(),
                        manager_meta.fee,
                        Some(manager_meta.counter),
                        &group.hash,
                        OpPayload::Origination(OriginationOp {
                            contract_id: 0,
                            delegate_id: None,
                            balance: *balance,
                            script: None,
                            storage: None,
                            internal_nonce: None,
                        }),
                    );
                    drafts.push((op, content.clone()));
                    build_internal_drafts(ctx, &meta, &mut drafts, &group.hash, internals)?;
                }
                UnpackedContent::Delegation {
                    source,
                    meta: manager_meta,
                    ..
                } => {
                    let sender = ctx.resolve(source)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        manager_meta.status,
                        manager_meta.errors.clone(),
                        manager_meta.fee,
                        Some(manager_meta.counter),
                        &group.hash,
                        OpPayload::Delegation(DelegationOp {
                            new_delegate_id: None,
                            prev_delegate_id: None,
                            registered_delegate: false,
                            internal_nonce: None,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
                UnpackedContent::RegisterConstant {
                    source,
                    meta: manager_meta,
                    expression,
                    global_address,
                    storage_used,
                } => {
                    let sender = ctx.resolve(source)?;
                    let op = make_op(
                        ctx,
                        &meta,
                        sender,
                        manager_meta.status,
                        manager_meta.errors.clone(),
                        manager_meta.fee,
                        Some(manager_meta.counter),
                        &group.hash,
                        OpPayload::RegisterConstant(RegisterConstantOp {
                            global_address: global_address.clone().unwrap_or_default(),
                            expression: expression.clone(),
                            storage_used: *storage_used,
                        }),
                    );
                    drafts.push((op, content.clone()));
                }
            }
        }
    }
    Ok(drafts)
}

/// Internal results become their own drafts, applied right after the outer
/// operation through the same commits (zero fees, no counter)
fn build_internal_drafts(
    ctx: &mut BlockCtx,
    meta: &DraftMeta,
    drafts: &mut Vec<(Operation, UnpackedContent)>,
    group_hash: &tessera_common::OpHash,
    internals: &[InternalContent],
) -> Result<(), IndexError> {
    for internal in internals {
        match internal {
            InternalContent::Transaction {
                source,
                nonce,
                status,
                errors,
                amount,
                destination,
                entrypoint,
                parameters,
                allocated_destination,
                paid_storage_diff,
            } => {
                let sender = ctx.resolve(source)?;
                let target = ctx.resolve(destination)?;
                let op = make_op(
                    ctx,
                    meta,
                    sender,
                    *status,
                    errors.clone(),
                    0,
                    None,
                    group_hash,
                    OpPayload::Transaction(TransactionOp {
                        target_id: Some(target),
                        amount: *amount,
                        entrypoint: entrypoint.clone(),
                        parameters: parameters.clone(),
                        allocated_target: false,
                        internal_nonce: Some(*nonce),
                    }),
                );
                let content = UnpackedContent::Transaction {
                    source: source.clone(),
                    meta: ManagerMeta {
                        status: *status,
                        errors: errors.clone(),
                        fee: 0,
                        counter: 0,
                    },
                    amount: *amount,
                    destination: destination.clone(),
                    entrypoint: entrypoint.clone(),
                    parameters: parameters.clone(),
                    allocated_destination: *allocated_destination,
                    paid_storage_diff: *paid_storage_diff,
                    internals: Vec::new(),
                };
                drafts.push((op, content));
            }
            InternalContent::Origination {
                source,
                nonce,
                status,
                errors,
                balance,
                delegate,
                script,
                storage,
                originated,
                paid_storage_diff,
            } => {
                let sender = ctx.resolve(source)?;
                let op = make_op(
                    ctx,
                    meta,
                    sender,
                    *status,
                    errors.clone(),
                    0,
                    None,
                    group_hash,
                    OpPayload::Origination(OriginationOp {
                        contract_id: 0,
                        delegate_id: None,
                        balance: *balance,
                        script: None,
                        storage: None,
                        internal_nonce: Some(*nonce),
                    }),
                );
                let content = UnpackedContent::Origination {
                    source: source.clone(),
                    meta: ManagerMeta {
                        status: *status,
                        errors: errors.clone(),
                        fee: 0,
                        counter: 0,
                    },
                    balance: *balance,
                    delegate: delegate.clone(),
                    script: script.clone(),
                    storage: storage.clone(),
                    originated: originated.clone(),
                    paid_storage_diff: *paid_storage_diff,
                    internals: Vec::new(),
                };
                drafts.push((op, content));
            }
            InternalContent::Delegation {
                source,
                nonce,
                status,
                errors,
                delegate,
            } => {
                let sender = ctx.resolve(source)?;
                let op = make_op(
                    ctx,
                    meta,
                    sender,
                    *status,
                    errors.clone(),
                    0,
                    None,
                    group_hash,
                    OpPayload::Delegation(DelegationOp {
                        new_delegate_id: None,
                        prev_delegate_id: None,
                        registered_delegate: false,
                        internal_nonce: Some(*nonce),
                    }),
                );
                let content = UnpackedContent::Delegation {
                    source: source.clone(),
                    meta: ManagerMeta {
                        status: *status,
                        errors: errors.clone(),
                        fee: 0,
                        counter: 0,
                    },
                    delegate: delegate.clone(),
                };
                drafts.push((op, content));
            }
        }
    }
    Ok(())
}

fn collect_touched(op: &Operation, touched: &mut BTreeSet<AccountId>) {
    touched.insert(op.sender_id);
    match &op.payload {
        OpPayload::Transaction(t) => {
            if let Some(target) = t.target_id {
                touched.insert(target);
            }
        }
        OpPayload::Origination(o) => {
            touched.insert(o.contract_id);
            if let Some(delegate) = o.delegate_id {
                touched.insert(delegate);
            }
        }
        OpPayload::Delegation(d) => {
            if let Some(id) = d.new_delegate_id {
                touched.insert(id);
            }
            if let Some(id) = d.prev_delegate_id {
                touched.insert(id);
            }
        }
        OpPayload::DoubleBaking(d) => {
            touched.insert(d.offender_id);
            touched.insert(d.accuser_id);
        }
        OpPayload::DoubleEndorsing(d) => {
            touched.insert(d.offender_id);
            touched.insert(d.accuser_id);
        }
        OpPayload::NonceRevelation(n) => {
            touched.insert(n.baker_id);
        }
        _ => {}
    }
}

/// First block of a voting period: take the voter snapshot. The period row
/// itself normally exists already (created when its predecessor ended);
/// bootstrap opens it here
fn begin_period(ctx: &mut BlockCtx, bundle: &BlockBundle) -> Result<(), IndexError> {
    let index = ctx.block.voting_period_index;
    let level = ctx.level();

    if ctx.cache.period(ctx.tx, index)?.is_none() {
        let epoch = ctx.cache.app_state().voting_epoch;
        let span = ctx.constants.blocks_per_voting_period as Level;
        ctx.cache.insert_period(VotingPeriod {
            index,
            epoch,
            kind: ctx.rules.voting_periods[0],
            first_level: level,
            last_level: level + span - 1,
            status: PeriodStatus::Active,
            top_upvotes: 0,
            top_rolls: 0,
            proposals_count: 0,
            total_rolls: 0,
            yay_rolls: 0,
            nay_rolls: 0,
            pass_rolls: 0,
            ballot_quorum: None,
            participation_ema: None,
        });
    }

    // Voter rolls: prefer the node's listings, fall back to local state
    let mut rows = Vec::new();
    let mut total_rolls = 0i64;
    match &bundle.voter_listings {
        Some(listings) => {
            for listing in listings {
                let baker_id = ctx.resolve_delegate(&listing.pkh)?;
                total_rolls += listing.rolls as i64;
                rows.push(VotingSnapshot {
                    period_index: index,
                    baker_id,
                    rolls: listing.rolls,
                    status: VoterStatus::None,
                });
            }
        }
        None => {
            for delegate in ctx.tx.delegates()? {
                let Some(info) = delegate.delegate() else { continue };
                if info.deactivation_level.is_some_and(|l| l <= level) {
                    continue;
                }
                let rolls = ctx.constants.rolls_of(info.staking_balance);
                if rolls == 0 {
                    continue;
                }
                total_rolls += rolls as i64;
                rows.push(VotingSnapshot {
                    period_index: index,
                    baker_id: delegate.id,
                    rolls,
                    status: VoterStatus::None,
                });
            }
        }
    }
    ctx.tx.insert_voting_snapshots(&rows)?;

    let Some(period) = ctx.cache.period_mut(ctx.tx, index)? else {
        return Err(IndexError::corruption(format!("voting period {index} missing")));
    };
    period.total_rolls = total_rolls as i32;
    debug!(period = index, voters = rows.len(), "Voting snapshot taken");
    Ok(())
}

/// Last block of a period: run the state machine, settle proposal statuses
/// and open the successor period
fn end_period(ctx: &mut BlockCtx) -> Result<(), IndexError> {
    let index = ctx.block.voting_period_index;
    let level = ctx.level();
    let constants = ctx.constants;
    let periods = ctx.rules.voting_periods;

    let (outcome, epoch, kind, ema, participation) = {
        let Some(period) = ctx.cache.period(ctx.tx, index)? else {
            return Err(IndexError::corruption(format!("voting period {index} missing")));
        };
        let outcome = voting_machine::transition(period, constants, periods);
        let cast = (period.yay_rolls + period.nay_rolls + period.pass_rolls) as i64;
        (
            outcome,
            period.epoch,
            period.kind,
            period.participation_ema.unwrap_or(INITIAL_PARTICIPATION_EMA),
            math::ratio(cast, period.total_rolls as i64),
        )
    };

    // The EMA advances only when a ballot actually happened
    let next_ema = match kind {
        PeriodKind::Exploration | PeriodKind::Promotion => math::ema_update(ema, participation),
        _ => ema,
    };

    {
        let Some(period) = ctx.cache.period_mut(ctx.tx, index)? else {
            return Err(IndexError::corruption(format!("voting period {index} missing")));
        };
        period.status = outcome.status();
    }

    // Settle proposal statuses; last_period marks who moved on, which is
    // also what the revert keys off
    let proposals = ctx.cache.proposals_of_epoch(ctx.tx, epoch)?;
    let winner = proposals
        .iter()
        .filter(|p| p.status == ProposalStatus::Active)
        .max_by(|a, b| a.rolls.cmp(&b.rolls).then_with(|| b.id.cmp(&a.id)))
        .map(|p| p.id);
    for proposal in &proposals {
        if proposal.status != ProposalStatus::Active {
            continue;
        }
        let Some(entry) = ctx.cache.proposal_mut(ctx.tx, proposal.id)? else { continue };
        match outcome {
            PeriodOutcome::Advance(_) => {
                if Some(entry.id) == winner {
                    entry.last_period = index + 1;
                } else {
                    entry.status = ProposalStatus::Skipped;
                }
            }
            PeriodOutcome::Complete => {
                if Some(entry.id) == winner {
                    entry.status = ProposalStatus::Accepted;
                }
            }
            PeriodOutcome::Restart(_) => {
                entry.status = if kind == PeriodKind::Proposal {
                    ProposalStatus::Skipped
                } else {
                    ProposalStatus::Rejected
                };
            }
        }
    }

    let (next_kind, next_epoch) = match outcome {
        PeriodOutcome::Advance(kind) => (kind, epoch),
        PeriodOutcome::Complete | PeriodOutcome::Restart(_) => {
            ctx.cache.app_state_mut().voting_epoch = epoch + 1;
            (PeriodKind::Proposal, epoch + 1)
        }
    };

    let is_ballot = matches!(next_kind, PeriodKind::Exploration | PeriodKind::Promotion);
    let span = constants.blocks_per_voting_period as Level;
    ctx.cache.insert_period(VotingPeriod {
        index: index + 1,
        epoch: next_epoch,
        kind: next_kind,
        first_level: level + 1,
        last_level: level + span,
        status: PeriodStatus::Active,
        top_upvotes: 0,
        top_rolls: 0,
        proposals_count: 0,
        total_rolls: 0,
        yay_rolls: 0,
        nay_rolls: 0,
        pass_rolls: 0,
        ballot_quorum: is_ballot.then(|| voting_machine::quorum_for(constants, next_ema)),
        participation_ema: Some(next_ema),
    });

    info!(
        period = index,
        ?outcome,
        next = %next_kind,
        "Voting period finished"
    );
    Ok(())
}

/// Exact inverse of [`end_period`]
fn revert_end_period(ctx: &mut BlockCtx) -> Result<(), IndexError> {
    let index = ctx.block.voting_period_index;

    let (epoch, epoch_changed) = {
        let Some(period) = ctx.cache.period(ctx.tx, index)? else {
            return Err(IndexError::corruption(format!("voting period {index} missing")));
        };
        let epoch = period.epoch;
        let next_epoch = ctx
            .cache
            .period(ctx.tx, index + 1)?
            .map(|p| p.epoch)
            .unwrap_or(epoch);
        (epoch, next_epoch != epoch)
    };

    ctx.tx.delete_period(index + 1)?;
    ctx.cache.drop_period(index + 1);
    if epoch_changed {
        ctx.cache.app_state_mut().voting_epoch = epoch;
    }

    {
        let Some(period) = ctx.cache.period_mut(ctx.tx, index)? else {
            return Err(IndexError::corruption(format!("voting period {index} missing")));
        };
        period.status = PeriodStatus::Active;
    }

    // Proposals settled by this transition carry last_period == index
    // (or index + 1 for the advancing winner)
    let proposals = ctx.cache.proposals_of_epoch(ctx.tx, epoch)?;
    for proposal in proposals {
        let Some(entry) = ctx.cache.proposal_mut(ctx.tx, proposal.id)? else { continue };
        if entry.last_period == index + 1 {
            entry.last_period = index;
        } else if entry.last_period == index && entry.status != ProposalStatus::Active {
            entry.status = ProposalStatus::Active;
        }
    }
    Ok(())
}

/// Per-block liquidity-baking bookkeeping: escape EMA plus the subsidy mint
fn liquidity_baking(ctx: &mut BlockCtx, handler: &Handler) -> Result<(), IndexError> {
    let level = ctx.level();
    let previous_ema = ctx
        .tx
        .block_at(level - 1)?
        .and_then(|b| b.lb_escape_ema)
        .unwrap_or(0);
    let vote = ctx.block.lb_escape_vote.unwrap_or(false);
    let ema = (previous_ema * (LB_EMA_WINDOW - 1) + if vote { LB_EMA_UNIT } else { 0 })
        / LB_EMA_WINDOW;
    ctx.block.lb_escape_ema = Some(ema);

    if ema >= ctx.constants.lb_escape_ema_threshold {
        debug!(level, ema, "Liquidity baking subsidy suspended");
        return Ok(());
    }
    let Some(target) = handler.rules.lb_subsidy_target else {
        return Ok(());
    };
    let address = tessera_common::Address::new(target)
        .map_err(|e| IndexError::corruption(e.to_string()))?;
    let sender = ctx.resolve(&address)?;
    let id = ctx.cache.app_state_mut().next_op_id();
    let mut op = Operation {
        id,
        level,
        cycle: ctx.block.cycle,
        timestamp: ctx.block.timestamp,
        hash: None,
        sender_id: sender,
        status: OpStatus::Applied,
        errors: None,
        baker_fee: 0,
        storage_fee: 0,
        allocation_fee: 0,
        counter: None,
        payload: OpPayload::Migration(MigrationOp {
            kind: MigrationKind::Subsidy,
            balance_change: ctx.constants.lb_subsidy,
        }),
    };
    commits::migration::apply_synthetic(ctx, &mut op)?;
    ctx.tx.insert_operation(&op)?;
    Ok(())
}
