//! Global constant registrations (Proto-11 onwards)

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{IndexError, OpKind, OpPayload, Operation, OperationsMask, UnpackedContent};

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::RegisterConstant { storage_used, .. } = content else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;
    let status = op.status;
    let baker_fee = op.baker_fee;

    if status.is_applied() {
        op.storage_fee = storage_used * ctx.constants.byte_cost;
    }

    ctx.block.operations |= OperationsMask::RegisterConstants;
    ctx.block.fees += baker_fee;
    ctx.bump(sender, OpKind::RegisterConstant, 1)?;
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter;
    }

    if status.is_applied() {
        ctx.credit(sender, -(baker_fee + op.storage_fee))?;
    } else {
        ctx.credit(sender, -baker_fee)?;
    }
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::RegisterConstant(_) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;

    if op.status.is_applied() {
        ctx.credit(sender, op.baker_fee + op.storage_fee)?;
    } else {
        ctx.credit(sender, op.baker_fee)?;
    }
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter - 1;
    }
    ctx.bump(sender, OpKind::RegisterConstant, -1)?;
    Ok(())
}
