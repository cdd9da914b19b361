//! Endorsements - deposit and reward accrue into the frozen pools

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{
    IndexError, OpKind, OpPayload, Operation, OperationsMask, RightStatus, UnpackedContent,
};

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Endorsement { slots, .. } = content else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;
    let cycle = ctx.cycle();

    let reward = (ctx.rules.endorsement_reward)(ctx.constants, ctx.block.priority, *slots);
    let deposit = ctx.constants.endorsement_deposit * *slots as i64;
    let endorsed_level = {
        let OpPayload::Endorsement(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.reward = reward;
        payload.deposit = deposit;
        payload.endorsed_level
    };

    ctx.block.operations |= OperationsMask::Endorsements;
    ctx.bump(sender, OpKind::Endorsement, 1)?;
    ctx.freeze(sender, cycle, deposit, reward, 0)?;
    ctx.tx.set_endorsing_right_status(endorsed_level, sender, RightStatus::Realized)?;
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Endorsement(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;
    let cycle = ctx.cycle();

    ctx.tx.set_endorsing_right_status(payload.endorsed_level, sender, RightStatus::Future)?;
    ctx.freeze(sender, cycle, -payload.deposit, -payload.reward, 0)?;
    ctx.bump(sender, OpKind::Endorsement, -1)?;
    Ok(())
}
