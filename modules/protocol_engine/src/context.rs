//! Block context - everything a commit needs while applying or reverting

use tessera_common::{
    Account, AccountDetails, AccountId, Address, BlockRow, CycleIndex, DelegateInfo, FrozenBalance,
    IndexError, Level, Mutez, OpKind, ProtocolConstants,
};
use tessera_module_state_store::{EntityCache, StoreTx};
use tracing::warn;

use crate::registry::ProtocolRules;

/// Mutable view over one block apply/revert; commits never touch the store
/// or cache except through this
pub struct BlockCtx<'a, 'c> {
    pub tx: &'a StoreTx<'c>,
    pub cache: &'a mut EntityCache,
    pub constants: &'a ProtocolConstants,
    pub rules: &'a ProtocolRules,
    pub block: &'a mut BlockRow,
}

impl BlockCtx<'_, '_> {
    pub fn level(&self) -> Level {
        self.block.level
    }

    pub fn cycle(&self) -> CycleIndex {
        self.block.cycle
    }

    /// Cached account by id; absence here means the projection broke
    pub fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, IndexError> {
        match self.cache.account_mut(self.tx, id)? {
            Some(account) => Ok(account),
            None => Err(IndexError::corruption(format!("account {id} vanished"))),
        }
    }

    pub fn account(&mut self, id: AccountId) -> Result<&Account, IndexError> {
        match self.cache.account(self.tx, id)? {
            Some(account) => Ok(account),
            None => Err(IndexError::corruption(format!("account {id} vanished"))),
        }
    }

    /// Find-or-create by address; fresh rows start at the current level
    pub fn resolve(&mut self, address: &Address) -> Result<AccountId, IndexError> {
        let level = self.level();
        Ok(self.cache.resolve_account(self.tx, address, level)?)
    }

    /// Like [`resolve`] but the account must be able to bake: fresh rows are
    /// born delegates; an existing plain user is promoted with a warning
    /// (start-level bootstrap only - a synced chain registers delegates
    /// through delegation operations)
    pub fn resolve_delegate(&mut self, address: &Address) -> Result<AccountId, IndexError> {
        let level = self.level();
        let id = self.resolve(address)?;
        let account = self.account_mut(id)?;
        match &account.details {
            AccountDetails::Delegate(_) => {}
            AccountDetails::User | AccountDetails::Ghost => {
                if account.first_level < level {
                    warn!(%address, "Implicitly promoting account to delegate");
                }
                let balance = account.balance;
                account.details = AccountDetails::Delegate(DelegateInfo {
                    staking_balance: balance,
                    active_since: level,
                    ..DelegateInfo::default()
                });
                account.delegate_id = Some(id);
            }
            AccountDetails::Contract(_) => {
                return Err(IndexError::corruption(format!("contract {address} used as baker")));
            }
        }
        Ok(id)
    }

    /// Balance change with staking maintenance: the delegate's staking
    /// balance moves with every delegator (and own) balance change
    pub fn credit(&mut self, id: AccountId, delta: Mutez) -> Result<(), IndexError> {
        let host = {
            let account = self.account_mut(id)?;
            account.balance += delta;
            if account.balance < 0 {
                return Err(IndexError::corruption(format!(
                    "negative balance on account {id}"
                )));
            }
            if account.is_delegate() {
                Some(account.id)
            } else {
                account.delegate_id
            }
        };
        if let Some(host) = host {
            let delegate = self.account_mut(host)?;
            if let Some(info) = delegate.delegate_mut() {
                info.staking_balance += delta;
                if info.staking_balance < 0 {
                    return Err(IndexError::corruption(format!(
                        "negative staking balance on delegate {host}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Aggregate counter bump plus last-activity touch
    pub fn bump(&mut self, id: AccountId, kind: OpKind, delta: i32) -> Result<(), IndexError> {
        let level = self.level();
        let account = self.account_mut(id)?;
        account.counts.bump(kind, delta);
        if delta > 0 {
            account.last_level = level;
        }
        Ok(())
    }

    /// Point an account at a delegate; moves the delegator's whole balance
    /// into the delegate's staking balance
    pub fn link_delegate(
        &mut self,
        id: AccountId,
        delegate: AccountId,
    ) -> Result<(), IndexError> {
        let balance = {
            let account = self.account_mut(id)?;
            account.delegate_id = Some(delegate);
            account.balance
        };
        if delegate == id {
            return Ok(());
        }
        let host = self.account_mut(delegate)?;
        let Some(info) = host.delegate_mut() else {
            return Err(IndexError::corruption(format!(
                "delegation target {delegate} is not a delegate"
            )));
        };
        info.delegators_count += 1;
        info.staking_balance += balance;
        Ok(())
    }

    /// Exact inverse of [`link_delegate`]
    pub fn unlink_delegate(
        &mut self,
        id: AccountId,
        delegate: AccountId,
    ) -> Result<(), IndexError> {
        let balance = {
            let account = self.account_mut(id)?;
            account.delegate_id = None;
            account.balance
        };
        if delegate == id {
            return Ok(());
        }
        let host = self.account_mut(delegate)?;
        let Some(info) = host.delegate_mut() else {
            return Err(IndexError::corruption(format!(
                "delegation target {delegate} is not a delegate"
            )));
        };
        info.delegators_count -= 1;
        info.staking_balance -= balance;
        if info.staking_balance < 0 || info.delegators_count < 0 {
            return Err(IndexError::corruption(format!(
                "staking underflow on delegate {delegate}"
            )));
        }
        Ok(())
    }

    /// Move amounts into (delta > 0) or out of (delta < 0) a baker's frozen
    /// pools, both the per-cycle row and the delegate aggregates
    pub fn freeze(
        &mut self,
        baker: AccountId,
        cycle: CycleIndex,
        deposits: Mutez,
        rewards: Mutez,
        fees: Mutez,
    ) -> Result<(), IndexError> {
        let mut row = self.tx.frozen(cycle, baker)?.unwrap_or(FrozenBalance {
            cycle,
            baker_id: baker,
            deposits: 0,
            rewards: 0,
            fees: 0,
            unfrozen_at: None,
        });
        row.deposits += deposits;
        row.rewards += rewards;
        row.fees += fees;
        if row.deposits < 0 || row.rewards < 0 || row.fees < 0 {
            return Err(IndexError::corruption(format!(
                "negative frozen pool for baker {baker} cycle {cycle}"
            )));
        }
        if row.deposits == 0 && row.rewards == 0 && row.fees == 0 && row.unfrozen_at.is_none() {
            self.tx.delete_frozen(cycle, baker)?;
        } else {
            self.tx.upsert_frozen(&row)?;
        }

        let level = self.level();
        let account = self.account_mut(baker)?;
        account.last_level = account.last_level.max(level);
        let Some(info) = account.delegate_mut() else {
            return Err(IndexError::corruption(format!("baker {baker} is not a delegate")));
        };
        info.frozen_deposits += deposits;
        info.frozen_rewards += rewards;
        info.frozen_fees += fees;
        Ok(())
    }
}
