//! Singleton application state - the indexer's durable head pointer

use crate::address::{BlockHash, ProtocolHash};
use crate::{AccountId, Level, OpId};
use serde::{Deserialize, Serialize};

/// Mutated at every block boundary, persisted in the same transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Level of the last indexed block
    pub level: Level,
    /// Hash of the last indexed block; None before the first block
    pub hash: Option<BlockHash>,
    pub protocol: Option<ProtocolHash>,
    pub timestamp: i64,
    pub next_operation_id: OpId,
    pub next_account_id: AccountId,
    /// Chain-global manager counter high-water mark
    pub manager_counter: i64,
    /// Best remote head level seen so far
    pub known_head: Level,
    /// Current protocol-amendment epoch
    pub voting_epoch: i32,
    pub chain_id: Option<String>,
}

impl AppState {
    /// Fresh state positioned just before `start_level`
    pub fn bootstrap(start_level: Level) -> Self {
        Self {
            level: start_level - 1,
            hash: None,
            protocol: None,
            timestamp: 0,
            next_operation_id: 1,
            next_account_id: 1,
            manager_counter: 0,
            known_head: 0,
            voting_epoch: 0,
            chain_id: None,
        }
    }

    /// Allocate the next global operation id
    pub fn next_op_id(&mut self) -> OpId {
        let id = self.next_operation_id;
        self.next_operation_id += 1;
        id
    }

    /// Return an id on revert - only the last allocated one is reclaimed,
    /// anything older leaves a gap (downstream sorts by id, not density)
    pub fn release_op_id(&mut self, id: OpId) {
        if id + 1 == self.next_operation_id {
            self.next_operation_id = id;
        }
    }

    pub fn next_acct_id(&mut self) -> AccountId {
        let id = self.next_account_id;
        self.next_account_id += 1;
        id
    }

    pub fn release_acct_id(&mut self, id: AccountId) {
        if id + 1 == self.next_account_id {
            self.next_account_id = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ids_are_dense_without_reverts() {
        let mut s = AppState::bootstrap(1);
        let a = s.next_op_id();
        let b = s.next_op_id();
        let c = s.next_op_id();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(s.next_operation_id, 4);
    }

    #[test]
    fn only_last_id_is_reclaimed() {
        let mut s = AppState::bootstrap(1);
        let a = s.next_op_id();
        let b = s.next_op_id();
        // Releasing out of order leaves a gap
        s.release_op_id(a);
        assert_eq!(s.next_operation_id, 3);
        // The last allocated id is reclaimed
        s.release_op_id(b);
        assert_eq!(s.next_operation_id, 2);
    }
}
