//! Writer-to-downstream notifications

use tessera_common::{BlockHash, Level, ProtocolHash};

/// State-changed events broadcast after every committed step; the read API
/// and WebSocket processors subscribe to these
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Applied { level: Level, hash: BlockHash },
    /// A reorg reverted local state down to `level`
    Reorg { level: Level },
    ProtocolChange { hash: ProtocolHash },
}
