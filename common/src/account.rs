//! Accounts - users, delegates, originated contracts and ghosts

use crate::address::Address;
use crate::operation::OpKind;
use crate::{AccountId, Level, Mutez};
use serde::{Deserialize, Serialize};

/// Account type tag, also persisted as a small integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    User,
    Delegate,
    Contract,
    Ghost,
}

impl From<AccountType> for u8 {
    fn from(t: AccountType) -> u8 {
        match t {
            AccountType::User => 0,
            AccountType::Delegate => 1,
            AccountType::Contract => 2,
            AccountType::Ghost => 3,
        }
    }
}

impl TryFrom<u8> for AccountType {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<AccountType> {
        match v {
            0 => Ok(AccountType::User),
            1 => Ok(AccountType::Delegate),
            2 => Ok(AccountType::Contract),
            3 => Ok(AccountType::Ghost),
            n => anyhow::bail!("Impossible account type {n}"),
        }
    }
}

/// Contract kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    /// Plain delegator contract (pre-Babylon manager.tz style)
    DelegatorContract,
    /// Contract with code
    SmartContract,
}

impl From<ContractKind> for u8 {
    fn from(k: ContractKind) -> u8 {
        match k {
            ContractKind::DelegatorContract => 0,
            ContractKind::SmartContract => 1,
        }
    }
}

impl TryFrom<u8> for ContractKind {
    type Error = anyhow::Error;
    fn try_from(v: u8) -> anyhow::Result<ContractKind> {
        match v {
            0 => Ok(ContractKind::DelegatorContract),
            1 => Ok(ContractKind::SmartContract),
            n => anyhow::bail!("Impossible contract kind {n}"),
        }
    }
}

/// Per-kind aggregate operation counters, common to every account type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    pub transactions: i32,
    pub originations: i32,
    pub delegations: i32,
    pub reveals: i32,
    pub endorsements: i32,
    pub proposals: i32,
    pub ballots: i32,
    pub double_bakings: i32,
    pub double_endorsings: i32,
    pub nonce_revelations: i32,
    pub activations: i32,
    pub migrations: i32,
    pub register_constants: i32,
}

impl OperationCounts {
    /// Counter slot for an operation kind
    pub fn slot(&mut self, kind: OpKind) -> &mut i32 {
        match kind {
            OpKind::Transaction => &mut self.transactions,
            OpKind::Origination => &mut self.originations,
            OpKind::Delegation => &mut self.delegations,
            OpKind::Reveal => &mut self.reveals,
            OpKind::Endorsement => &mut self.endorsements,
            OpKind::Proposals => &mut self.proposals,
            OpKind::Ballot => &mut self.ballots,
            OpKind::DoubleBaking => &mut self.double_bakings,
            OpKind::DoubleEndorsing => &mut self.double_endorsings,
            OpKind::NonceRevelation => &mut self.nonce_revelations,
            OpKind::Activation => &mut self.activations,
            OpKind::Migration => &mut self.migrations,
            OpKind::RegisterConstant => &mut self.register_constants,
        }
    }

    pub fn bump(&mut self, kind: OpKind, delta: i32) {
        *self.slot(kind) += delta;
    }
}

/// Delegate tail - staking aggregates and per-cycle frozen totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateInfo {
    /// Own balance plus all delegators' balances
    pub staking_balance: Mutez,

    pub delegators_count: i32,

    /// Level at which the delegate was registered
    pub active_since: Level,

    /// Level at which the delegate was (or is scheduled to be) deactivated
    pub deactivation_level: Option<Level>,

    /// Aggregate frozen pools, mirrored per-cycle in the store
    pub frozen_deposits: Mutez,
    pub frozen_rewards: Mutez,
    pub frozen_fees: Mutez,

    pub blocks_count: i32,
}

/// Contract tail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub kind: ContractKind,
    pub creator_id: AccountId,
    pub manager_id: Option<AccountId>,
    /// Michelson code, canonical JSON text
    pub script: Option<String>,
    /// Current storage, canonical JSON text
    pub storage: Option<String>,
    pub type_hash: i32,
    pub code_hash: i32,
}

/// Variant tails behind the account type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountDetails {
    User,
    Delegate(DelegateInfo),
    Contract(ContractInfo),
    /// Target of a failed allocation - row exists, chain account doesn't
    Ghost,
}

impl AccountDetails {
    pub fn account_type(&self) -> AccountType {
        match self {
            AccountDetails::User => AccountType::User,
            AccountDetails::Delegate(_) => AccountType::Delegate,
            AccountDetails::Contract(_) => AccountType::Contract,
            AccountDetails::Ghost => AccountType::Ghost,
        }
    }
}

/// Materialized account state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub address: Address,
    pub first_level: Level,
    pub last_level: Level,
    pub balance: Mutez,
    /// Manager counter of the last applied manager operation
    pub counter: i64,
    /// Revealed public key, if any
    pub pubkey: Option<String>,
    /// Delegate this account delegates to
    pub delegate_id: Option<AccountId>,
    pub counts: OperationCounts,
    pub details: AccountDetails,
}

impl Account {
    pub fn new(id: AccountId, address: Address, level: Level) -> Self {
        Self {
            id,
            address,
            first_level: level,
            last_level: level,
            balance: 0,
            counter: 0,
            pubkey: None,
            delegate_id: None,
            counts: OperationCounts::default(),
            details: AccountDetails::User,
        }
    }

    pub fn account_type(&self) -> AccountType {
        self.details.account_type()
    }

    pub fn is_delegate(&self) -> bool {
        matches!(self.details, AccountDetails::Delegate(_))
    }

    /// Delegate tail, if this account is a delegate
    pub fn delegate(&self) -> Option<&DelegateInfo> {
        match &self.details {
            AccountDetails::Delegate(d) => Some(d),
            _ => None,
        }
    }

    pub fn delegate_mut(&mut self) -> Option<&mut DelegateInfo> {
        match &mut self.details {
            AccountDetails::Delegate(d) => Some(d),
            _ => None,
        }
    }

    pub fn contract(&self) -> Option<&ContractInfo> {
        match &self.details {
            AccountDetails::Contract(c) => Some(c),
            _ => None,
        }
    }

    pub fn contract_mut(&mut self) -> Option<&mut ContractInfo> {
        match &mut self.details {
            AccountDetails::Contract(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        let address = Address::new("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx").unwrap();
        Account::new(1, address, 100)
    }

    #[test]
    fn new_account_is_plain_user() {
        let a = account();
        assert_eq!(a.account_type(), AccountType::User);
        assert!(a.delegate().is_none());
        assert_eq!(a.balance, 0);
        assert_eq!(a.first_level, a.last_level);
    }

    #[test]
    fn counters_bump_by_kind() {
        let mut a = account();
        a.counts.bump(OpKind::Transaction, 1);
        a.counts.bump(OpKind::Transaction, 1);
        a.counts.bump(OpKind::Delegation, 1);
        a.counts.bump(OpKind::Transaction, -1);
        assert_eq!(a.counts.transactions, 1);
        assert_eq!(a.counts.delegations, 1);
        assert_eq!(a.counts.reveals, 0);
    }

    #[test]
    fn type_tag_round_trips() {
        for t in [
            AccountType::User,
            AccountType::Delegate,
            AccountType::Contract,
            AccountType::Ghost,
        ] {
            assert_eq!(AccountType::try_from(u8::from(t)).unwrap(), t);
        }
        assert!(AccountType::try_from(9).is_err());
    }
}
