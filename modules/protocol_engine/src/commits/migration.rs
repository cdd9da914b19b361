//! Synthetic migration operations emitted by the engine itself
//! (balance rewrites, invoices, liquidity-baking subsidy mints)

use crate::commits::wrong_shape;
use crate::context::BlockCtx;
use tessera_common::{IndexError, OpKind, OpPayload, Operation, OperationsMask, UnpackedContent};

/// Migrations never arrive over the wire, so the engine calls this directly
pub fn apply_synthetic(ctx: &mut BlockCtx, op: &mut Operation) -> Result<(), IndexError> {
    let OpPayload::Migration(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let balance_change = payload.balance_change;
    let sender = op.sender_id;

    ctx.block.operations |= OperationsMask::Migrations;
    ctx.bump(sender, OpKind::Migration, 1)?;
    ctx.credit(sender, balance_change)?;
    Ok(())
}

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    _content: &UnpackedContent,
) -> Result<(), IndexError> {
    apply_synthetic(ctx, op)
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Migration(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    ctx.credit(op.sender_id, -payload.balance_change)?;
    ctx.bump(op.sender_id, OpKind::Migration, -1)?;
    Ok(())
}
