//! Block unpacker: node JSON into the domain [`UnpackedBlock`]
//!
//! Total over arbitrary input - every failure is a typed
//! [`ValidationError`] carrying the JSON path, never a panic.

use crate::fields::Json;
use serde_json::Value;
use tessera_common::{
    Address, BlockHash, InternalContent, ManagerMeta, OpHash, OpStatus, ProposalHash,
    ProtocolHash, UnpackedBlock, UnpackedContent, UnpackedGroup, ValidationError, ValidationPass,
    voting::Ballot,
};

pub fn unpack_block(doc: &Value) -> Result<UnpackedBlock, ValidationError> {
    let root = Json::root(doc);
    let header = root.at("header");
    let metadata = root.at("metadata");

    // Renamed to level_info in later protocols
    let level_info = if metadata.at("level_info").exists() {
        metadata.at("level_info")
    } else {
        metadata.at("level")
    };

    let mut groups = Vec::new();
    let passes = root.at("operations").array()?;
    for (pass_index, pass) in passes.iter().enumerate() {
        let pass_kind = match pass_index {
            0 => ValidationPass::Consensus,
            1 => ValidationPass::Voting,
            2 => ValidationPass::Anonymous,
            _ => ValidationPass::Manager,
        };
        for group in pass.array()? {
            let hash = OpHash::new(group.at("hash").str()?)?;
            let mut contents = Vec::new();
            for content in group.at("contents").array()? {
                contents.push(unpack_content(&content)?);
            }
            groups.push(UnpackedGroup {
                hash,
                pass: pass_kind,
                contents,
            });
        }
    }

    Ok(UnpackedBlock {
        hash: BlockHash::new(root.at("hash").str()?)?,
        level: header.at("level").i64()?,
        predecessor: BlockHash::new(header.at("predecessor").str()?)?,
        timestamp: header.at("timestamp").timestamp()?,
        protocol: ProtocolHash::new(root.at("protocol").str()?)?,
        next_protocol: ProtocolHash::new(metadata.at("next_protocol").str()?)?,
        baker: Address::new(metadata.at("baker").str()?)?,
        priority: opt_i32(&header.at("priority"))?.unwrap_or(0),
        cycle: level_info.at("cycle").i32()?,
        cycle_position: level_info.at("cycle_position").i32()?,
        voting_period_index: level_info.at("voting_period").i32()?,
        voting_period_position: level_info.at("voting_period_position").i32()?,
        seed_nonce_hash: opt_str(&header.at("seed_nonce_hash")),
        lb_escape_vote: header
            .at("liquidity_baking_escape_vote")
            .opt()
            .map(|j| j.bool())
            .transpose()?,
        groups,
    })
}

fn opt_str(j: &Json) -> Option<String> {
    j.opt().and_then(|j| j.str().ok().map(str::to_string))
}

fn opt_i32(j: &Json) -> Result<Option<i32>, ValidationError> {
    j.opt().map(|j| j.i32()).transpose()
}

fn opt_i64_or(j: &Json, default: i64) -> Result<i64, ValidationError> {
    Ok(j.opt().map(|j| j.i64()).transpose()?.unwrap_or(default))
}

fn status_of(result: &Json) -> Result<(OpStatus, Option<String>), ValidationError> {
    let status_field = result.at("status");
    let status = match status_field.str()? {
        "applied" => OpStatus::Applied,
        "failed" => OpStatus::Failed,
        "backtracked" => OpStatus::Backtracked,
        "skipped" => OpStatus::Skipped,
        other => {
            return Err(ValidationError::UnknownStatus {
                value: other.to_string(),
                path: status_field.path().to_string(),
            })
        }
    };
    let errors = result
        .at("errors")
        .opt()
        .and_then(|j| j.raw())
        .map(|v| v.to_string());
    Ok((status, errors))
}

fn manager_meta(content: &Json) -> Result<ManagerMeta, ValidationError> {
    let (status, errors) = status_of(&content.at("metadata").at("operation_result"))?;
    Ok(ManagerMeta {
        status,
        errors,
        fee: content.at("fee").i64()?,
        counter: content.at("counter").i64()?,
    })
}

/// Net credit to `contract` balance updates, used for activation amounts
fn contract_credit(metadata: &Json) -> Result<i64, ValidationError> {
    let Some(updates) = metadata.at("balance_updates").opt() else {
        return Ok(0);
    };
    let mut total = 0i64;
    for update in updates.array()? {
        if update.at("kind").str()? == "contract" {
            total += update.at("change").i64()?;
        }
    }
    Ok(total)
}

/// Offender of an accusation: the delegate whose freezer pools were slashed
fn accusation_offender(metadata: &Json) -> Result<Address, ValidationError> {
    let updates = metadata.at("balance_updates");
    for update in updates.array()? {
        if update.at("kind").str()? == "freezer" && update.at("change").i64()? < 0 {
            return Ok(Address::new(update.at("delegate").str()?)?);
        }
    }
    Err(ValidationError::MissingField {
        path: format!("{}[freezer]", updates.path()),
    })
}

fn parameters_of(content: &Json) -> Result<(Option<String>, Option<String>), ValidationError> {
    let Some(params) = content.at("parameters").opt() else {
        return Ok((None, None));
    };
    let entrypoint = opt_str(&params.at("entrypoint"));
    let value = params.at("value").opt().and_then(|j| j.raw()).map(|v| v.to_string());
    Ok((entrypoint, value))
}

fn internal_results(content: &Json) -> Result<Vec<InternalContent>, ValidationError> {
    let Some(list) = content.at("metadata").at("internal_operation_results").opt() else {
        return Ok(Vec::new());
    };
    let mut internals = Vec::new();
    for item in list.array()? {
        let kind_field = item.at("kind");
        let source = Address::new(item.at("source").str()?)?;
        let nonce = item.at("nonce").i32()?;
        let result = item.at("result");
        let (status, errors) = status_of(&result)?;
        match kind_field.str()? {
            "transaction" => {
                let (entrypoint, parameters) = parameters_of(&item)?;
                internals.push(InternalContent::Transaction {
                    source,
                    nonce,
                    status,
                    errors,
                    amount: item.at("amount").i64()?,
                    destination: Address::new(item.at("destination").str()?)?,
                    entrypoint,
                    parameters,
                    allocated_destination: result
                        .at("allocated_destination_contract")
                        .opt()
                        .map(|j| j.bool())
                        .transpose()?
                        .unwrap_or(false),
                    paid_storage_diff: opt_i64_or(&result.at("paid_storage_size_diff"), 0)?,
                });
            }
            "origination" => {
                let script = item.at("script");
                internals.push(InternalContent::Origination {
                    source,
                    nonce,
                    status,
                    errors,
                    balance: item.at("balance").i64()?,
                    delegate: item
                        .at("delegate")
                        .opt()
                        .map(|j| j.str().and_then(|s| Ok(Address::new(s)?)))
                        .transpose()?,
                    script: script.at("code").opt().and_then(|j| j.raw()).map(|v| v.to_string()),
                    storage: script.at("storage").opt().and_then(|j| j.raw()).map(|v| v.to_string()),
                    originated: first_originated(&result)?,
                    paid_storage_diff: opt_i64_or(&result.at("paid_storage_size_diff"), 0)?,
                });
            }
            "delegation" => {
                internals.push(InternalContent::Delegation {
                    source,
                    nonce,
                    status,
                    errors,
                    delegate: item
                        .at("delegate")
                        .opt()
                        .map(|j| j.str().and_then(|s| Ok(Address::new(s)?)))
                        .transpose()?,
                });
            }
            other => {
                return Err(ValidationError::UnknownOpKind {
                    kind: other.to_string(),
                    path: kind_field.path().to_string(),
                })
            }
        }
    }
    Ok(internals)
}

fn first_originated(result: &Json) -> Result<Option<Address>, ValidationError> {
    let Some(list) = result.at("originated_contracts").opt() else {
        return Ok(None);
    };
    Ok(Some(Address::new(list.index(0).str()?)?))
}

fn unpack_content(content: &Json) -> Result<UnpackedContent, ValidationError> {
    let kind_field = content.at("kind");
    match kind_field.str()? {
        "endorsement" | "endorsement_with_slot" => {
            let metadata = content.at("metadata");
            Ok(UnpackedContent::Endorsement {
                delegate: Address::new(metadata.at("delegate").str()?)?,
                slots: metadata.at("slots").array()?.len() as i32,
                endorsed_level: content.at("level").i64()?,
            })
        }
        "seed_nonce_revelation" => Ok(UnpackedContent::SeedNonceRevelation {
            revealed_level: content.at("level").i64()?,
            nonce: content.at("nonce").str()?.to_string(),
        }),
        "activate_account" => Ok(UnpackedContent::Activation {
            account: Address::new(content.at("pkh").str()?)?,
            balance: contract_credit(&content.at("metadata"))?,
        }),
        "double_baking_evidence" => Ok(UnpackedContent::DoubleBaking {
            accused_level: content.at("bh1").at("level").i64()?,
            offender: accusation_offender(&content.at("metadata"))?,
        }),
        "double_endorsement_evidence" => Ok(UnpackedContent::DoubleEndorsing {
            accused_level: content.at("op1").at("operations").at("level").i64()?,
            offender: accusation_offender(&content.at("metadata"))?,
        }),
        "proposals" => {
            let mut proposals = Vec::new();
            for hash in content.at("proposals").array()? {
                proposals.push(ProposalHash::new(hash.str()?)?);
            }
            Ok(UnpackedContent::Proposals {
                source: Address::new(content.at("source").str()?)?,
                period: content.at("period").i32()?,
                proposals,
            })
        }
        "ballot" => {
            let ballot_field = content.at("ballot");
            let vote = match ballot_field.str()? {
                "yay" => Ballot::Yay,
                "nay" => Ballot::Nay,
                "pass" => Ballot::Pass,
                other => {
                    return Err(ValidationError::UnknownStatus {
                        value: other.to_string(),
                        path: ballot_field.path().to_string(),
                    })
                }
            };
            Ok(UnpackedContent::Ballot {
                source: Address::new(content.at("source").str()?)?,
                period: content.at("period").i32()?,
                proposal: ProposalHash::new(content.at("proposal").str()?)?,
                vote,
            })
        }
        "reveal" => Ok(UnpackedContent::Reveal {
            source: Address::new(content.at("source").str()?)?,
            meta: manager_meta(content)?,
            public_key: content.at("public_key").str()?.to_string(),
        }),
        "transaction" => {
            let result = content.at("metadata").at("operation_result");
            let (entrypoint, parameters) = parameters_of(content)?;
            Ok(UnpackedContent::Transaction {
                source: Address::new(content.at("source").str()?)?,
                meta: manager_meta(content)?,
                amount: content.at("amount").i64()?,
                destination: Address::new(content.at("destination").str()?)?,
                entrypoint,
                parameters,
                allocated_destination: result
                    .at("allocated_destination_contract")
                    .opt()
                    .map(|j| j.bool())
                    .transpose()?
                    .unwrap_or(false),
                paid_storage_diff: opt_i64_or(&result.at("paid_storage_size_diff"), 0)?,
                internals: internal_results(content)?,
            })
        }
        "origination" => {
            let result = content.at("metadata").at("operation_result");
            let script = content.at("script");
            Ok(UnpackedContent::Origination {
                source: Address::new(content.at("source").str()?)?,
                meta: manager_meta(content)?,
                balance: content.at("balance").i64()?,
                delegate: content
                    .at("delegate")
                    .opt()
                    .map(|j| j.str().and_then(|s| Ok(Address::new(s)?)))
                    .transpose()?,
                script: script.at("code").opt().and_then(|j| j.raw()).map(|v| v.to_string()),
                storage: script.at("storage").opt().and_then(|j| j.raw()).map(|v| v.to_string()),
                originated: first_originated(&result)?,
                paid_storage_diff: opt_i64_or(&result.at("paid_storage_size_diff"), 0)?,
                internals: internal_results(content)?,
            })
        }
        "delegation" => Ok(UnpackedContent::Delegation {
            source: Address::new(content.at("source").str()?)?,
            meta: manager_meta(content)?,
            delegate: content
                .at("delegate")
                .opt()
                .map(|j| j.str().and_then(|s| Ok(Address::new(s)?)))
                .transpose()?,
        }),
        "register_global_constant" => {
            let result = content.at("metadata").at("operation_result");
            Ok(UnpackedContent::RegisterConstant {
                source: Address::new(content.at("source").str()?)?,
                meta: manager_meta(content)?,
                expression: content
                    .at("value")
                    .raw()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                global_address: opt_str(&result.at("global_address")),
                storage_used: opt_i64_or(&result.at("storage_size"), 0)?,
            })
        }
        other => Err(ValidationError::UnknownOpKind {
            kind: other.to_string(),
            path: kind_field.path().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BLOCK_HASH: &str = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45gN";
    const PRED_HASH: &str = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45gQ";
    const PROTO: &str = "PsCARTHAGazKbHtnKfLzQg3kms52kSRpgnDY982a9oYsSXRLQEb";
    const OP_HASH: &str = "ooPMQcQYa6HykEGJRVJPrG7iG5nnWBoobGsGYYUvMeGv8UhGPRT233";
    const TZ1_A: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const TZ1_B: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSy";

    fn block_doc(operations: serde_json::Value) -> serde_json::Value {
        json!({
            "protocol": PROTO,
            "chain_id": "NetXdQprcVkpaWU",
            "hash": BLOCK_HASH,
            "header": {
                "level": 101,
                "predecessor": PRED_HASH,
                "timestamp": "2020-09-28T08:49:34Z",
                "priority": 0
            },
            "metadata": {
                "protocol": PROTO,
                "next_protocol": PROTO,
                "baker": TZ1_B,
                "level": {
                    "cycle": 0,
                    "cycle_position": 100,
                    "voting_period": 0,
                    "voting_period_position": 100
                }
            },
            "operations": operations
        })
    }

    #[test]
    fn unpacks_applied_transaction() {
        let doc = block_doc(json!([[], [], [], [
            {
                "hash": OP_HASH,
                "contents": [{
                    "kind": "transaction",
                    "source": TZ1_A,
                    "fee": "1000",
                    "counter": "1",
                    "amount": "500000",
                    "destination": TZ1_B,
                    "metadata": {
                        "operation_result": { "status": "applied" }
                    }
                }]
            }
        ]]));

        let block = unpack_block(&doc).unwrap();
        assert_eq!(block.level, 101);
        assert_eq!(block.groups.len(), 1);
        assert_eq!(block.groups[0].pass, ValidationPass::Manager);
        match &block.groups[0].contents[0] {
            UnpackedContent::Transaction {
                source,
                meta,
                amount,
                destination,
                internals,
                ..
            } => {
                assert_eq!(source.as_str(), TZ1_A);
                assert_eq!(destination.as_str(), TZ1_B);
                assert_eq!(*amount, 500_000);
                assert_eq!(meta.fee, 1000);
                assert_eq!(meta.status, OpStatus::Applied);
                assert!(internals.is_empty());
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn missing_destination_is_a_missing_field_with_path() {
        let doc = block_doc(json!([[], [], [], [
            {
                "hash": OP_HASH,
                "contents": [{
                    "kind": "transaction",
                    "source": TZ1_A,
                    "fee": "0",
                    "counter": "1",
                    "amount": "1",
                    "metadata": { "operation_result": { "status": "applied" } }
                }]
            }
        ]]));

        let err = unpack_block(&doc).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                path: "operations[3][0].contents[0].destination".into()
            }
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let doc = block_doc(json!([[], [], [], [
            { "hash": OP_HASH, "contents": [{ "kind": "teleportation" }] }
        ]]));
        assert!(matches!(
            unpack_block(&doc).unwrap_err(),
            ValidationError::UnknownOpKind { kind, .. } if kind == "teleportation"
        ));
    }

    #[test]
    fn failed_status_and_errors_survive() {
        let doc = block_doc(json!([[], [], [], [
            {
                "hash": OP_HASH,
                "contents": [{
                    "kind": "transaction",
                    "source": TZ1_A,
                    "fee": "1000",
                    "counter": "1",
                    "amount": "500000",
                    "destination": TZ1_B,
                    "metadata": {
                        "operation_result": {
                            "status": "failed",
                            "errors": [{"id": "contract.balance_too_low"}]
                        }
                    }
                }]
            }
        ]]));

        let block = unpack_block(&doc).unwrap();
        match &block.groups[0].contents[0] {
            UnpackedContent::Transaction { meta, .. } => {
                assert_eq!(meta.status, OpStatus::Failed);
                assert!(meta.errors.as_deref().unwrap().contains("balance_too_low"));
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn endorsement_counts_slots() {
        let doc = block_doc(json!([[
            {
                "hash": OP_HASH,
                "contents": [{
                    "kind": "endorsement",
                    "level": 100,
                    "metadata": { "delegate": TZ1_B, "slots": [3, 7, 11] }
                }]
            }
        ], [], [], []]));

        let block = unpack_block(&doc).unwrap();
        match &block.groups[0].contents[0] {
            UnpackedContent::Endorsement {
                delegate,
                slots,
                endorsed_level,
            } => {
                assert_eq!(delegate.as_str(), TZ1_B);
                assert_eq!(*slots, 3);
                assert_eq!(*endorsed_level, 100);
            }
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[test]
    fn internal_transaction_is_carried_with_its_outer_op() {
        let doc = block_doc(json!([[], [], [], [
            {
                "hash": OP_HASH,
                "contents": [{
                    "kind": "transaction",
                    "source": TZ1_A,
                    "fee": "1000",
                    "counter": "1",
                    "amount": "0",
                    "destination": TZ1_B,
                    "metadata": {
                        "operation_result": { "status": "applied" },
                        "internal_operation_results": [{
                            "kind": "transaction",
                            "source": TZ1_B,
                            "nonce": 0,
                            "amount": "250",
                            "destination": TZ1_A,
                            "result": { "status": "applied" }
                        }]
                    }
                }]
            }
        ]]));

        let block = unpack_block(&doc).unwrap();
        match &block.groups[0].contents[0] {
            UnpackedContent::Transaction { internals, .. } => {
                assert_eq!(internals.len(), 1);
                match &internals[0] {
                    InternalContent::Transaction { amount, nonce, .. } => {
                        assert_eq!(*amount, 250);
                        assert_eq!(*nonce, 0);
                    }
                    other => panic!("unexpected internal {other:?}"),
                }
            }
            other => panic!("unexpected content {other:?}"),
        }
    }
}
