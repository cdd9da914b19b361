//! Cycle boundary engine: roll snapshots, rights materialization,
//! end-of-cycle unfreezing and revelation penalties

use crate::context::BlockCtx;
use tessera_common::{
    BakingRight, Cycle, CycleBundle, CycleIndex, DelegateSnapshot, EndorsingRight, IndexError,
    Level, RightStatus,
};
use tracing::{debug, info};

/// First block of a cycle: record the snapshot, the cycle row and the
/// precomputed rights (all scoped by cycle so a revert can drop them)
pub fn begin_cycle(ctx: &mut BlockCtx, bundle: &CycleBundle) -> Result<(), IndexError> {
    let cycle = bundle.cycle;
    let constants = ctx.constants;

    // Local roll snapshot over the currently active delegates
    let mut snapshots = Vec::new();
    let mut total_rolls = 0i64;
    let mut total_staking = 0i64;
    for delegate in ctx.tx.delegates()? {
        let Some(info) = delegate.delegate() else { continue };
        if info.deactivation_level.is_some_and(|l| l <= ctx.level()) {
            continue;
        }
        let rolls = constants.rolls_of(info.staking_balance);
        if rolls == 0 {
            continue;
        }
        total_rolls += rolls as i64;
        total_staking += info.staking_balance;
        snapshots.push(DelegateSnapshot {
            cycle,
            baker_id: delegate.id,
            rolls,
            staking_balance: info.staking_balance,
            delegators_count: info.delegators_count,
        });
    }
    ctx.tx.insert_delegate_snapshots(&snapshots)?;

    // The protocol picks the snapshot among the candidate levels of the
    // cycle that seeded these rights
    let snapshot_span = constants.blocks_per_snapshot as Level;
    let seed_cycle = cycle - constants.preserved_cycles - 1;
    let snapshot_level = if seed_cycle < 0 {
        1
    } else {
        constants.cycle_start(seed_cycle) + (bundle.snapshot_index as Level + 1) * snapshot_span - 1
    };

    ctx.tx.insert_cycle(&Cycle {
        index: cycle,
        first_level: constants.cycle_start(cycle),
        last_level: constants.cycle_end(cycle),
        snapshot_index: bundle.snapshot_index,
        snapshot_level,
        total_rolls: total_rolls as i32,
        total_staking,
        selected_bakers: snapshots.len() as i32,
        seed: bundle.seed.clone(),
    })?;

    let mut baking = Vec::with_capacity(bundle.baking_rights.len());
    for right in &bundle.baking_rights {
        let baker_id = ctx.resolve_delegate(&right.baker)?;
        baking.push(BakingRight {
            cycle,
            level: right.level,
            baker_id,
            priority: right.priority,
            status: RightStatus::Future,
        });
    }
    ctx.tx.insert_baking_rights(&baking)?;

    let mut endorsing = Vec::with_capacity(bundle.endorsing_rights.len());
    for right in &bundle.endorsing_rights {
        let baker_id = ctx.resolve_delegate(&right.baker)?;
        endorsing.push(EndorsingRight {
            cycle,
            level: right.level,
            baker_id,
            slots: right.slots,
            status: RightStatus::Future,
        });
    }
    ctx.tx.insert_endorsing_rights(&endorsing)?;

    info!(
        cycle,
        bakers = snapshots.len(),
        rolls = total_rolls,
        "Cycle materialized"
    );
    Ok(())
}

/// Revert of [`begin_cycle`]: drop everything the cycle's first block
/// materialized
pub fn revert_begin_cycle(ctx: &mut BlockCtx, cycle: CycleIndex) -> Result<(), IndexError> {
    ctx.tx.delete_rights_of_cycle(cycle)?;
    ctx.tx.delete_delegate_snapshots(cycle)?;
    ctx.tx.delete_cycle(cycle)?;
    Ok(())
}

/// Last block of a cycle: release the pools frozen `preserved_cycles` ago
/// and close out unrevealed nonces of the previous cycle
pub fn end_cycle(ctx: &mut BlockCtx) -> Result<(), IndexError> {
    let level = ctx.level();
    let ending = ctx.cycle();

    // Revelation penalties first: unrevealed commitments of the previous
    // cycle cost their baker that cycle's remaining rewards and fees
    let penalized_cycle = ending - 1;
    if penalized_cycle >= 0 {
        for mut nonce in ctx.tx.nonces_of_cycle(penalized_cycle)? {
            if nonce.revealed_at.is_some() || nonce.penalized_at.is_some() {
                continue;
            }
            let Some(frozen) = ctx.tx.frozen(penalized_cycle, nonce.baker_id)? else {
                continue;
            };
            if frozen.unfrozen_at.is_some() {
                continue;
            }
            nonce.penalty_rewards = frozen.rewards;
            nonce.penalty_fees = frozen.fees;
            nonce.penalized_at = Some(level);
            ctx.freeze(
                nonce.baker_id,
                penalized_cycle,
                0,
                -nonce.penalty_rewards,
                -nonce.penalty_fees,
            )?;
            ctx.tx.upsert_nonce(&nonce)?;
            debug!(
                baker = nonce.baker_id,
                cycle = penalized_cycle,
                "Confiscated rewards for a missed nonce revelation"
            );
        }
    }

    // Unfreeze the cycle that has now matured
    let matured = ending - ctx.constants.preserved_cycles;
    if matured >= 0 {
        for mut frozen in ctx.tx.frozen_of_cycle(matured)? {
            if frozen.unfrozen_at.is_some() {
                continue;
            }
            let released = frozen.deposits + frozen.rewards + frozen.fees;
            ctx.freeze(frozen.baker_id, matured, -frozen.deposits, -frozen.rewards, -frozen.fees)?;
            // freeze() dropped the zeroed row; keep it as the unfreeze marker
            frozen.unfrozen_at = Some(level);
            ctx.tx.upsert_frozen(&frozen)?;
            ctx.credit(frozen.baker_id, released)?;
        }
        info!(cycle = matured, at = level, "Unfroze matured cycle");
    }
    Ok(())
}

/// Revert of [`end_cycle`], driven entirely by the markers it left behind
pub fn revert_end_cycle(ctx: &mut BlockCtx) -> Result<(), IndexError> {
    let level = ctx.level();

    for frozen in ctx.tx.frozen_unfrozen_at(level)? {
        ctx.credit(frozen.baker_id, -(frozen.deposits + frozen.rewards + frozen.fees))?;
        // Restore the live row exactly as it was before the unfreeze
        ctx.tx.delete_frozen(frozen.cycle, frozen.baker_id)?;
        ctx.freeze(
            frozen.baker_id,
            frozen.cycle,
            frozen.deposits,
            frozen.rewards,
            frozen.fees,
        )?;
    }

    for mut nonce in ctx.tx.nonces_penalized_at(level)? {
        ctx.freeze(nonce.baker_id, nonce.cycle, 0, nonce.penalty_rewards, nonce.penalty_fees)?;
        nonce.penalty_rewards = 0;
        nonce.penalty_fees = 0;
        nonce.penalized_at = None;
        ctx.tx.upsert_nonce(&nonce)?;
    }
    Ok(())
}
