//! Tessera chain RPC - client, unpacker and source seams for the Tezos node

pub mod client;
pub mod fields;
pub mod quotes;
pub mod source;
pub mod unpack;

pub use client::{NodeClient, RpcError};
pub use quotes::{DisabledQuoteFeed, QuoteFeed};
pub use source::ChainSource;
pub use unpack::unpack_block;
