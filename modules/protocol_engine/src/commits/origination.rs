//! Contract originations

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use std::hash::{DefaultHasher, Hash, Hasher};
use tessera_common::{
    AccountDetails, ContractInfo, ContractKind, IndexError, OpKind, OpPayload, Operation,
    OperationsMask, UnpackedContent,
};

fn short_hash(text: Option<&str>) -> i32 {
    let mut hasher = DefaultHasher::new();
    text.unwrap_or_default().hash(&mut hasher);
    hasher.finish() as i32
}

pub fn apply(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Origination {
        delegate,
        script,
        storage,
        originated,
        paid_storage_diff,
        ..
    } = content
    else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;
    let status = op.status;
    let baker_fee = op.baker_fee;

    ctx.block.operations |= OperationsMask::Originations;
    ctx.block.fees += baker_fee;
    ctx.bump(sender, OpKind::Origination, 1)?;
    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter;
    }

    if !status.is_applied() {
        ctx.credit(sender, -baker_fee)?;
        return Ok(());
    }

    let Some(address) = originated else {
        return Err(IndexError::corruption(format!(
            "applied origination {} without an originated contract",
            op.id
        )));
    };

    op.storage_fee = paid_storage_diff * ctx.constants.byte_cost;
    op.allocation_fee = ctx.constants.origination_size as i64 * ctx.constants.byte_cost;

    // Allocate the contract row
    let contract_id = ctx.resolve(address)?;
    let delegate_id = match delegate {
        Some(d) => Some(ctx.resolve_delegate(d)?),
        None => None,
    };
    {
        let contract = ctx.account_mut(contract_id)?;
        contract.details = AccountDetails::Contract(ContractInfo {
            kind: if script.is_some() {
                ContractKind::SmartContract
            } else {
                ContractKind::DelegatorContract
            },
            creator_id: sender,
            manager_id: Some(sender),
            script: script.clone(),
            storage: storage.clone(),
            type_hash: short_hash(storage.as_deref()),
            code_hash: short_hash(script.as_deref()),
        });
    }
    ctx.bump(contract_id, OpKind::Origination, 1)?;

    let balance = {
        let OpPayload::Origination(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.contract_id = contract_id;
        payload.delegate_id = delegate_id;
        payload.script = script.clone();
        payload.storage = storage.clone();
        payload.balance
    };

    ctx.credit(sender, -(balance + op.total_fees()))?;
    ctx.credit(contract_id, balance)?;
    if let Some(delegate_id) = delegate_id {
        ctx.link_delegate(contract_id, delegate_id)?;
    }
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Origination(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;

    if op.status.is_applied() {
        if let Some(delegate_id) = payload.delegate_id {
            ctx.unlink_delegate(payload.contract_id, delegate_id)?;
        }
        ctx.credit(payload.contract_id, -payload.balance)?;
        ctx.credit(sender, payload.balance + op.total_fees())?;
        ctx.bump(payload.contract_id, OpKind::Origination, -1)?;
        // The contract row itself is removed by the fresh-account sweep
        // once its counters and balance are back to zero
    } else {
        ctx.credit(sender, op.baker_fee)?;
    }

    if let Some(counter) = op.counter {
        ctx.account_mut(sender)?.counter = counter - 1;
    }
    ctx.bump(sender, OpKind::Origination, -1)?;
    Ok(())
}
