//! Block-level baker accounting - not an explicit operation
//!
//! Runs after the operation phase (fees are known by then): freezes the
//! baker's deposit, reward and collected fees, and realizes the baking
//! right at the block's priority.

use crate::context::BlockCtx;
use tessera_common::{IndexError, RightStatus};

pub fn apply(ctx: &mut BlockCtx) -> Result<(), IndexError> {
    let baker = ctx.block.baker_id;
    let cycle = ctx.cycle();
    let level = ctx.level();
    let priority = ctx.block.priority;

    let reward = (ctx.rules.block_reward)(ctx.constants, priority);
    let deposit = ctx.constants.block_deposit;
    let fees = ctx.block.fees;
    ctx.block.reward = reward;
    ctx.block.deposit = deposit;

    ctx.freeze(baker, cycle, deposit, reward, fees)?;
    {
        let account = ctx.account_mut(baker)?;
        account.last_level = level;
        if let Some(info) = account.delegate_mut() {
            info.blocks_count += 1;
        }
    }

    ctx.tx.set_baking_right_status(level, priority, RightStatus::Realized)?;
    for missed in 0..priority {
        ctx.tx.set_baking_right_status(level, missed, RightStatus::Missed)?;
    }
    Ok(())
}

pub fn revert(ctx: &mut BlockCtx) -> Result<(), IndexError> {
    let baker = ctx.block.baker_id;
    let cycle = ctx.cycle();
    let level = ctx.level();

    ctx.tx.reset_rights_at(level)?;
    {
        let account = ctx.account_mut(baker)?;
        if let Some(info) = account.delegate_mut() {
            info.blocks_count -= 1;
        }
    }
    ctx.freeze(
        baker,
        cycle,
        -ctx.block.deposit,
        -ctx.block.reward,
        -ctx.block.fees,
    )?;
    Ok(())
}
