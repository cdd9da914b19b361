//! Tessera state store - SQLite persistence plus the in-memory entity cache

pub mod cache;
pub mod error;
pub mod filter;
pub mod store;

pub use cache::EntityCache;
pub use error::{StoreError, StoreResult};
pub use filter::{Cmp, Filter};
pub use store::{Store, StoreTx};
