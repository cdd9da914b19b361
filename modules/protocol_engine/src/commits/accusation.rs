//! Double-baking and double-endorsing evidence
//!
//! The offender's frozen pools for the accused cycle are wiped; half of the
//! lost deposit goes to the accuser (the block baker) as a frozen reward.
//! Amounts are persisted per pool so revert restores both sides exactly.

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{
    Address, IndexError, Level, Mutez, OpKind, OpPayload, Operation, OperationsMask,
    UnpackedContent,
};

struct Accusation {
    accused_level: Level,
    offender_id: i64,
    accuser_id: i64,
    lost_deposits: Mutez,
    lost_rewards: Mutez,
    lost_fees: Mutez,
    accuser_reward: Mutez,
}

fn apply_accusation(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    kind: OpKind,
    accused_level: Level,
    offender: &Address,
) -> Result<Accusation, IndexError> {
    let accuser = op.sender_id;
    let offender_id = ctx.resolve_delegate(offender)?;
    let accused_cycle = ctx.constants.cycle_of(accused_level);

    // A row already released by cycle-end has nothing left to confiscate
    let frozen = ctx.tx.frozen(accused_cycle, offender_id)?.filter(|f| f.unfrozen_at.is_none());
    let (lost_deposits, lost_rewards, lost_fees) = frozen
        .map(|f| (f.deposits, f.rewards, f.fees))
        .unwrap_or((0, 0, 0));
    let accuser_reward = lost_deposits / 2;

    ctx.freeze(offender_id, accused_cycle, -lost_deposits, -lost_rewards, -lost_fees)?;
    ctx.freeze(accuser, ctx.block.cycle, 0, accuser_reward, 0)?;

    ctx.bump(accuser, kind, 1)?;
    if offender_id != accuser {
        ctx.bump(offender_id, kind, 1)?;
    }

    Ok(Accusation {
        accused_level,
        offender_id,
        accuser_id: accuser,
        lost_deposits,
        lost_rewards,
        lost_fees,
        accuser_reward,
    })
}

fn revert_accusation(
    ctx: &mut BlockCtx,
    kind: OpKind,
    accusation: &Accusation,
) -> Result<(), IndexError> {
    let accused_cycle = ctx.constants.cycle_of(accusation.accused_level);

    ctx.freeze(
        accusation.accuser_id,
        ctx.block.cycle,
        0,
        -accusation.accuser_reward,
        0,
    )?;
    ctx.freeze(
        accusation.offender_id,
        accused_cycle,
        accusation.lost_deposits,
        accusation.lost_rewards,
        accusation.lost_fees,
    )?;

    ctx.bump(accusation.accuser_id, kind, -1)?;
    if accusation.offender_id != accusation.accuser_id {
        ctx.bump(accusation.offender_id, kind, -1)?;
    }
    Ok(())
}

pub fn apply_double_baking(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::DoubleBaking {
        accused_level,
        offender,
    } = content
    else {
        return Err(wrong_content(content));
    };
    ctx.block.operations |= OperationsMask::DoubleBakings;

    let result = apply_accusation(ctx, op, OpKind::DoubleBaking, *accused_level, offender)?;
    let OpPayload::DoubleBaking(payload) = &mut op.payload else {
        return Err(wrong_shape(op));
    };
    payload.accused_level = result.accused_level;
    payload.offender_id = result.offender_id;
    payload.accuser_id = result.accuser_id;
    payload.offender_lost_deposits = result.lost_deposits;
    payload.offender_lost_rewards = result.lost_rewards;
    payload.offender_lost_fees = result.lost_fees;
    payload.accuser_reward = result.accuser_reward;
    Ok(())
}

pub fn revert_double_baking(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::DoubleBaking(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    revert_accusation(
        ctx,
        OpKind::DoubleBaking,
        &Accusation {
            accused_level: payload.accused_level,
            offender_id: payload.offender_id,
            accuser_id: payload.accuser_id,
            lost_deposits: payload.offender_lost_deposits,
            lost_rewards: payload.offender_lost_rewards,
            lost_fees: payload.offender_lost_fees,
            accuser_reward: payload.accuser_reward,
        },
    )
}

pub fn apply_double_endorsing(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::DoubleEndorsing {
        accused_level,
        offender,
    } = content
    else {
        return Err(wrong_content(content));
    };
    ctx.block.operations |= OperationsMask::DoubleEndorsings;

    let result = apply_accusation(ctx, op, OpKind::DoubleEndorsing, *accused_level, offender)?;
    let OpPayload::DoubleEndorsing(payload) = &mut op.payload else {
        return Err(wrong_shape(op));
    };
    payload.accused_level = result.accused_level;
    payload.offender_id = result.offender_id;
    payload.accuser_id = result.accuser_id;
    payload.offender_lost_deposits = result.lost_deposits;
    payload.offender_lost_rewards = result.lost_rewards;
    payload.offender_lost_fees = result.lost_fees;
    payload.accuser_reward = result.accuser_reward;
    Ok(())
}

pub fn revert_double_endorsing(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::DoubleEndorsing(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    revert_accusation(
        ctx,
        OpKind::DoubleEndorsing,
        &Accusation {
            accused_level: payload.accused_level,
            offender_id: payload.offender_id,
            accuser_id: payload.accuser_id,
            lost_deposits: payload.offender_lost_deposits,
            lost_rewards: payload.offender_lost_rewards,
            lost_fees: payload.offender_lost_fees,
            accuser_reward: payload.accuser_reward,
        },
    )
}
