//! Public key reveals

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{IndexError, OpKind, OpPayload, Operation, OperationsMask, UnpackedContent};

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Reveal { public_key, .. } = content else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;

    ctx.block.operations |= OperationsMask::Reveals;
    ctx.block.fees += op.baker_fee;
    ctx.bump(sender, OpKind::Reveal, 1)?;
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter;
    }
    ctx.credit(sender, -op.baker_fee)?;

    if op.status.is_applied() {
        ctx.account_mut(sender)?.pubkey = Some(public_key.clone());
    }
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Reveal(_) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;

    if op.status.is_applied() {
        ctx.account_mut(sender)?.pubkey = None;
    }
    ctx.credit(sender, op.baker_fee)?;
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter - 1;
    }
    ctx.bump(sender, OpKind::Reveal, -1)?;
    Ok(())
}
