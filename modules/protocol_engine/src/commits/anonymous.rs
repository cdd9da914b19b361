//! Anonymous operations: account activations and seed nonce revelations

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{IndexError, OpKind, OpPayload, Operation, OperationsMask, UnpackedContent};
use tracing::warn;

pub fn apply_activation(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Activation { .. } = content else {
        return Err(wrong_content(content));
    };
    let OpPayload::Activation(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let balance = payload.balance;
    let sender = op.sender_id;

    ctx.block.operations |= OperationsMask::Activations;
    ctx.bump(sender, OpKind::Activation, 1)?;
    ctx.credit(sender, balance)?;
    Ok(())
}

pub fn revert_activation(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Activation(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;
    ctx.credit(sender, -payload.balance)?;
    ctx.bump(sender, OpKind::Activation, -1)?;
    Ok(())
}

pub fn apply_nonce_revelation(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::SeedNonceRevelation { revealed_level, .. } = content else {
        return Err(wrong_content(content));
    };
    let baker = op.sender_id;
    let cycle = ctx.cycle();
    let level = ctx.level();
    let reward = ctx.constants.seed_nonce_revelation_tip;

    {
        let OpPayload::NonceRevelation(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.baker_id = baker;
        payload.reward = reward;
        payload.revealed_level = *revealed_level;
    }

    ctx.block.operations |= OperationsMask::NonceRevelations;
    ctx.bump(baker, OpKind::NonceRevelation, 1)?;
    ctx.freeze(baker, cycle, 0, reward, 0)?;

    // Mark the commitment satisfied so cycle-end does not penalize it
    match ctx.tx.nonce_at(*revealed_level)? {
        Some(mut nonce) => {
            nonce.revealed_at = Some(level);
            ctx.tx.upsert_nonce(&nonce)?;
        }
        // Commitment predates our indexed history (start-level bootstrap)
        None => warn!(level = revealed_level, "Revelation for an untracked nonce"),
    }
    Ok(())
}

pub fn revert_nonce_revelation(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::NonceRevelation(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let cycle = ctx.cycle();

    if let Some(mut nonce) = ctx.tx.nonce_at(payload.revealed_level)? {
        nonce.revealed_at = None;
        ctx.tx.upsert_nonce(&nonce)?;
    }
    ctx.freeze(payload.baker_id, cycle, 0, -payload.reward, 0)?;
    ctx.bump(payload.baker_id, OpKind::NonceRevelation, -1)?;
    Ok(())
}
