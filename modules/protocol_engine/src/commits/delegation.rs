//! Delegation switches and delegate registration

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{
    AccountDetails, DelegateInfo, IndexError, OpKind, OpPayload, Operation, OperationsMask,
    UnpackedContent,
};

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Delegation { delegate, .. } = content else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;
    let status = op.status;
    let baker_fee = op.baker_fee;
    let level = ctx.level();

    ctx.block.operations |= OperationsMask::Delegations;
    ctx.block.fees += baker_fee;
    ctx.bump(sender, OpKind::Delegation, 1)?;
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter;
    }
    ctx.credit(sender, -baker_fee)?;

    if !status.is_applied() {
        return Ok(());
    }

    // Remember the previous delegate so revert can restore it exactly
    let (prev, already_delegate, own_address) = {
        let account = ctx.account(sender)?;
        let prev = if account.is_delegate() {
            Some(account.id)
        } else {
            account.delegate_id
        };
        (prev, account.is_delegate(), account.address.clone())
    };
    {
        let OpPayload::Delegation(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.prev_delegate_id = prev;
    }

    if let Some(prev) = prev {
        if prev != sender {
            ctx.unlink_delegate(sender, prev)?;
        }
    }

    match delegate {
        Some(address) if *address == own_address => {
            // Registering as a delegate
            if !already_delegate {
                let account = ctx.account_mut(sender)?;
                let balance = account.balance;
                account.details = AccountDetails::Delegate(DelegateInfo {
                    staking_balance: balance,
                    active_since: level,
                    ..DelegateInfo::default()
                });
                account.delegate_id = Some(sender);
                let OpPayload::Delegation(payload) = &mut op.payload else {
                    return Err(wrong_shape(op));
                };
                payload.registered_delegate = true;
                payload.new_delegate_id = Some(sender);
            }
        }
        Some(address) => {
            let delegate_id = ctx.resolve_delegate(address)?;
            ctx.link_delegate(sender, delegate_id)?;
            let OpPayload::Delegation(payload) = &mut op.payload else {
                return Err(wrong_shape(op));
            };
            payload.new_delegate_id = Some(delegate_id);
        }
        None => {}
    }
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Delegation(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;

    if op.status.is_applied() {
        if payload.registered_delegate {
            // Undo the registration, keeping the plain-user header intact
            let account = ctx.account_mut(sender)?;
            account.details = AccountDetails::User;
            account.delegate_id = None;
        } else if let Some(new_delegate) = payload.new_delegate_id {
            if new_delegate != sender {
                ctx.unlink_delegate(sender, new_delegate)?;
            }
        }
        if let Some(prev) = payload.prev_delegate_id {
            if prev != sender {
                ctx.link_delegate(sender, prev)?;
            } else {
                ctx.account_mut(sender)?.delegate_id = Some(prev);
            }
        }
    }

    ctx.credit(sender, op.baker_fee)?;
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter - 1;
    }
    ctx.bump(sender, OpKind::Delegation, -1)?;
    Ok(())
}
