//! Tessera protocol engine - versioned handlers, operation commits and the
//! cycle/voting machinery behind the sync loop

pub mod commits;
pub mod context;
pub mod cycles;
pub mod engine;
pub mod registry;
pub mod voting_machine;

pub use context::BlockCtx;
pub use engine::ProtocolEngine;
pub use registry::{Handler, HandlerRegistry, OpCommit, OpTable, ProtocolRules};
pub use voting_machine::PeriodOutcome;
