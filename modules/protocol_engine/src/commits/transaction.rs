//! Transfers, including internal ones emitted by contracts

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{IndexError, OpKind, Operation, OperationsMask, OpPayload, UnpackedContent};

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Transaction {
        allocated_destination,
        paid_storage_diff,
        ..
    } = content
    else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;
    let status = op.status;
    let counter = op.counter;
    let baker_fee = op.baker_fee;

    let (target, amount) = {
        let OpPayload::Transaction(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.allocated_target = *allocated_destination;
        (payload.target_id, payload.amount)
    };

    if status.is_applied() {
        op.storage_fee = paid_storage_diff * ctx.constants.byte_cost;
        op.allocation_fee = if *allocated_destination {
            ctx.constants.origination_size as i64 * ctx.constants.byte_cost
        } else {
            0
        };
    }

    ctx.block.operations |= OperationsMask::Transactions;
    ctx.block.fees += baker_fee;

    ctx.bump(sender, OpKind::Transaction, 1)?;
    if let Some(target) = target {
        if target != sender {
            ctx.bump(target, OpKind::Transaction, 1)?;
        }
    }
    if let Some(counter) = counter {
        ctx.account_mut(sender)?.counter = counter;
    }

    if status.is_applied() {
        ctx.credit(sender, -(amount + op.total_fees()))?;
        if let Some(target) = target {
            ctx.credit(target, amount)?;
        }
    } else {
        // Fee is charged even when the transfer itself did not go through
        ctx.credit(sender, -baker_fee)?;
    }
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Transaction(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;

    if op.status.is_applied() {
        if let Some(target) = payload.target_id {
            ctx.credit(target, -payload.amount)?;
        }
        ctx.credit(sender, payload.amount + op.total_fees())?;
    } else {
        ctx.credit(sender, op.baker_fee)?;
    }

    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter - 1;
    }
    ctx.bump(sender, OpKind::Transaction, -1)?;
    if let Some(target) = payload.target_id {
        if target != sender {
            ctx.bump(target, OpKind::Transaction, -1)?;
        }
    }
    Ok(())
}
