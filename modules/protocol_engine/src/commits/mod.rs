//! Operation commits - each module pairs a forward transition with its
//! exact inverse

pub mod accusation;
pub mod anonymous;
pub mod baking;
pub mod delegation;
pub mod endorsement;
pub mod migration;
pub mod origination;
pub mod register_constant;
pub mod reveal;
pub mod transaction;
pub mod voting;

use tessera_common::{IndexError, Operation, UnpackedContent};

/// Commits are dispatched against a fixed payload variant; anything else
/// means the engine built a draft wrong
pub(crate) fn wrong_shape(op: &Operation) -> IndexError {
    IndexError::corruption(format!("operation {} has mismatched payload", op.id))
}

pub(crate) fn wrong_content(content: &UnpackedContent) -> IndexError {
    IndexError::corruption(format!("content {content:?} reached the wrong commit"))
}
