//! Shared domain types for the Tessera chain indexer

pub mod account;
pub mod address;
pub mod app_state;
pub mod block;
pub mod cycle;
pub mod error;
pub mod math;
pub mod operation;
pub mod protocol;
pub mod quote;
pub mod voting;

pub use account::{
    Account, AccountDetails, AccountType, ContractInfo, ContractKind, DelegateInfo,
    OperationCounts,
};
pub use address::{Address, BlockHash, OpHash, ProposalHash, ProtocolHash};
pub use app_state::AppState;
pub use block::{
    BlockBundle, BlockRow, HeaderInfo, InternalContent, ManagerMeta, OperationsMask,
    UnpackedBlock, UnpackedContent, UnpackedGroup, ValidationPass,
};
pub use cycle::{
    BakingRight, Cycle, CycleBundle, DelegateSnapshot, EndorsingRight, FrozenBalance,
    NonceCommitment, RawBakingRight, RawEndorsingRight, RightStatus,
};
pub use error::{IndexError, ValidationError};
pub use operation::{MigrationKind, OpKind, OpPayload, OpStatus, Operation};
pub use protocol::{Protocol, ProtocolConstants};
pub use quote::Quote;
pub use voting::{
    Ballot, PeriodKind, PeriodStatus, Proposal, ProposalStatus, VoterListing, VoterStatus,
    VotingPeriod, VotingSnapshot,
};

/// Chain level (block height), starting from genesis at 1
pub type Level = i64;

/// Monotonic database identifier
pub type AccountId = i64;

/// Globally monotonic operation identifier, allocated from [`AppState`]
pub type OpId = i64;

/// Amount in micro-units (1 token = 1_000_000)
pub type Mutez = i64;

/// Cycle index
pub type CycleIndex = i32;

/// Voting period index
pub type PeriodIndex = i32;
