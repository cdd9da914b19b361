//! Proposal upvotes and ballots

use crate::commits::{wrong_content, wrong_shape};
use crate::context::BlockCtx;
use tessera_common::{
    IndexError, OpKind, OpPayload, Operation, OperationsMask, Proposal, ProposalStatus,
    UnpackedContent, ValidationError, VoterStatus,
};
use tracing::warn;

/// Applies one expanded proposals op (the unpacker splits an op carrying
/// several hashes into one draft per hash, all sharing the group hash)
pub fn apply_proposals(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Proposals { proposals, .. } = content else {
        return Err(wrong_content(content));
    };
    let [hash] = proposals.as_slice() else {
        return Err(IndexError::corruption(format!(
            "proposals draft {} was not expanded to a single hash",
            op.id
        )));
    };
    let sender = op.sender_id;
    let period_index = ctx.block.voting_period_index;

    let snapshot = ctx.tx.voting_snapshot(period_index, sender)?.ok_or_else(|| {
        IndexError::Validation(ValidationError::MissingSnapshot {
            period: period_index,
            baker: sender.to_string(),
        })
    })?;

    let epoch = {
        let Some(period) = ctx.cache.period(ctx.tx, period_index)? else {
            return Err(IndexError::corruption(format!("voting period {period_index} missing")));
        };
        period.epoch
    };

    // Find or create the proposal
    let (proposal_id, created) = match ctx.cache.proposal_id_by_hash(ctx.tx, hash, epoch)? {
        Some(id) => (id, false),
        None => {
            let id = ctx.cache.allocate_proposal_id(ctx.tx)?;
            ctx.cache.insert_proposal(Proposal {
                id,
                hash: hash.clone(),
                epoch,
                first_period: period_index,
                last_period: period_index,
                initiator_id: sender,
                upvotes: 0,
                rolls: 0,
                status: ProposalStatus::Active,
            });
            (id, true)
        }
    };

    let duplicated = !created && ctx.tx.upvote_exists(period_index, sender, proposal_id)?;
    {
        let OpPayload::Proposals(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.period_index = period_index;
        payload.proposal_id = proposal_id;
        payload.rolls = snapshot.rolls;
        payload.duplicated = duplicated;
    }

    ctx.block.operations |= OperationsMask::Proposals;
    ctx.bump(sender, OpKind::Proposals, 1)?;

    if duplicated {
        return Ok(());
    }

    let (rolls, upvotes) = {
        let Some(proposal) = ctx.cache.proposal_mut(ctx.tx, proposal_id)? else {
            return Err(IndexError::corruption(format!("proposal {proposal_id} vanished")));
        };
        proposal.upvotes += 1;
        proposal.rolls += snapshot.rolls;
        (proposal.rolls, proposal.upvotes)
    };

    let Some(period) = ctx.cache.period_mut(ctx.tx, period_index)? else {
        return Err(IndexError::corruption(format!("voting period {period_index} missing")));
    };
    if created {
        period.proposals_count += 1;
    }
    if rolls > period.top_rolls {
        period.top_rolls = rolls;
        period.top_upvotes = upvotes;
    }

    ctx.tx.set_snapshot_status(period_index, sender, VoterStatus::Upvoted)?;
    Ok(())
}

pub fn revert_proposals(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Proposals(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;
    let period_index = payload.period_index;

    if !payload.duplicated {
        let (emptied, epoch) = {
            let Some(proposal) = ctx.cache.proposal_mut(ctx.tx, payload.proposal_id)? else {
                return Err(IndexError::corruption(format!(
                    "proposal {} vanished",
                    payload.proposal_id
                )));
            };
            proposal.upvotes -= 1;
            proposal.rolls -= payload.rolls;
            (proposal.upvotes == 0, proposal.epoch)
        };
        if emptied {
            ctx.tx.delete_proposal(payload.proposal_id)?;
            ctx.cache.drop_proposal(payload.proposal_id);
        }

        // Recompute the period top from what is left: max rolls, ties broken
        // by the lowest id (and reported, since upvotes may disagree)
        let remaining = ctx.cache.proposals_of_epoch(ctx.tx, epoch)?;
        let top = remaining.iter().max_by(|a, b| {
            a.rolls.cmp(&b.rolls).then_with(|| b.id.cmp(&a.id))
        });
        if let Some(top) = top {
            if remaining.iter().any(|p| p.id != top.id && p.rolls == top.rolls) {
                warn!(
                    period = period_index,
                    rolls = top.rolls,
                    "Proposal tie on rolls while recomputing the period top"
                );
            }
        }
        let (top_rolls, top_upvotes) = top.map(|p| (p.rolls, p.upvotes)).unwrap_or((0, 0));

        let Some(period) = ctx.cache.period_mut(ctx.tx, period_index)? else {
            return Err(IndexError::corruption(format!("voting period {period_index} missing")));
        };
        if emptied {
            period.proposals_count -= 1;
        }
        period.top_rolls = top_rolls;
        period.top_upvotes = top_upvotes;
    }

    // Earlier upvotes from this sender keep the snapshot marked
    if !ctx.tx.earlier_proposal_op_exists(period_index, sender, op.id)? {
        ctx.tx.set_snapshot_status(period_index, sender, VoterStatus::None)?;
    }

    ctx.bump(sender, OpKind::Proposals, -1)?;
    Ok(())
}

pub fn apply_ballot(
    ctx: &mut BlockCtx,
    op: &mut Operation,
    content: &UnpackedContent,
) -> Result<(), IndexError> {
    let UnpackedContent::Ballot { proposal, vote, .. } = content else {
        return Err(wrong_content(content));
    };
    let sender = op.sender_id;
    let period_index = ctx.block.voting_period_index;

    let snapshot = ctx.tx.voting_snapshot(period_index, sender)?.ok_or_else(|| {
        IndexError::Validation(ValidationError::MissingSnapshot {
            period: period_index,
            baker: sender.to_string(),
        })
    })?;

    let epoch = {
        let Some(period) = ctx.cache.period(ctx.tx, period_index)? else {
            return Err(IndexError::corruption(format!("voting period {period_index} missing")));
        };
        period.epoch
    };
    let proposal_id = ctx.cache.proposal_id_by_hash(ctx.tx, proposal, epoch)?.ok_or_else(|| {
        IndexError::Validation(ValidationError::UnknownProposal {
            hash: proposal.as_str().to_string(),
        })
    })?;

    {
        let OpPayload::Ballot(payload) = &mut op.payload else {
            return Err(wrong_shape(op));
        };
        payload.period_index = period_index;
        payload.proposal_id = proposal_id;
        payload.vote = *vote;
        payload.rolls = snapshot.rolls;
    }

    ctx.block.operations |= OperationsMask::Ballots;
    ctx.bump(sender, OpKind::Ballot, 1)?;

    let Some(period) = ctx.cache.period_mut(ctx.tx, period_index)? else {
        return Err(IndexError::corruption(format!("voting period {period_index} missing")));
    };
    match vote {
        tessera_common::Ballot::Yay => period.yay_rolls += snapshot.rolls,
        tessera_common::Ballot::Nay => period.nay_rolls += snapshot.rolls,
        tessera_common::Ballot::Pass => period.pass_rolls += snapshot.rolls,
    }

    ctx.tx.set_snapshot_status(period_index, sender, VoterStatus::from(*vote))?;
    Ok(())
}

pub fn revert_ballot(ctx: &mut BlockCtx, op: &Operation) -> Result<(), IndexError> {
    let OpPayload::Ballot(payload) = &op.payload else {
        return Err(wrong_shape(op));
    };
    let sender = op.sender_id;

    let Some(period) = ctx.cache.period_mut(ctx.tx, payload.period_index)? else {
        return Err(IndexError::corruption(format!(
            "voting period {} missing",
            payload.period_index
        )));
    };
    match payload.vote {
        tessera_common::Ballot::Yay => period.yay_rolls -= payload.rolls,
        tessera_common::Ballot::Nay => period.nay_rolls -= payload.rolls,
        tessera_common::Ballot::Pass => period.pass_rolls -= payload.rolls,
    }

    // One ballot per baker per period; earlier upvotes (possible only when
    // a period mixes both op kinds) fall back to Upvoted
    let prior = if ctx.tx.earlier_proposal_op_exists(payload.period_index, sender, op.id)? {
        VoterStatus::Upvoted
    } else {
        VoterStatus::None
    };
    ctx.tx.set_snapshot_status(payload.period_index, sender, prior)?;
    ctx.bump(sender, OpKind::Ballot, -1)?;
    Ok(())
}
