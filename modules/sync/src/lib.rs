//! Tessera sync - the single-writer loop that keeps the indexed state a
//! correct, reversible projection of the remote chain

pub mod controller;
pub mod events;

pub use controller::{SyncConfig, SyncController, Tick};
pub use events::ChainEvent;
