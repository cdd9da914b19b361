//! Write-through entity cache
//!
//! Single source of identity inside one block commit: accounts by id and
//! address, proposals by hash, voting periods by index, plus the AppState
//! singleton. Mutation goes through the `*_mut` accessors, which attach the
//! entry to the in-flight transaction (mark it dirty and pin it); `flush`
//! writes dirty entries in FK order (accounts before everything referencing
//! them), `confirm` unpins after a successful commit and `invalidate` drops
//! dirty entries after a failed one.

use crate::error::StoreResult;
use crate::store::StoreTx;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tessera_common::{
    Account, AccountId, Address, AppState, Level, PeriodIndex, Proposal, ProposalHash,
    VotingPeriod,
};
use tracing::debug;

const DEFAULT_CAPACITY: usize = 16_384;

pub struct EntityCache {
    app_state: AppState,
    app_dirty: bool,

    accounts: HashMap<AccountId, Account>,
    by_address: HashMap<String, AccountId>,
    dirty_accounts: BTreeSet<AccountId>,
    /// Touch order for eviction; dirty entries are pinned regardless
    lru: VecDeque<AccountId>,
    capacity: usize,

    proposals: HashMap<i64, Proposal>,
    by_proposal_hash: HashMap<(String, i32), i64>,
    dirty_proposals: BTreeSet<i64>,

    periods: BTreeMap<PeriodIndex, VotingPeriod>,
    dirty_periods: BTreeSet<PeriodIndex>,
}

impl EntityCache {
    pub fn new(app_state: AppState) -> Self {
        Self::with_capacity(app_state, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(app_state: AppState, capacity: usize) -> Self {
        Self {
            app_state,
            app_dirty: false,
            accounts: HashMap::new(),
            by_address: HashMap::new(),
            dirty_accounts: BTreeSet::new(),
            lru: VecDeque::new(),
            capacity,
            proposals: HashMap::new(),
            by_proposal_hash: HashMap::new(),
            dirty_proposals: BTreeSet::new(),
            periods: BTreeMap::new(),
            dirty_periods: BTreeSet::new(),
        }
    }

    // ---------------------------------------------------------------- app state

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn app_state_mut(&mut self) -> &mut AppState {
        self.app_dirty = true;
        &mut self.app_state
    }

    // ---------------------------------------------------------------- accounts

    fn touch(&mut self, id: AccountId) {
        self.lru.retain(|&x| x != id);
        self.lru.push_back(id);
    }

    /// Read-only access, loading from the store on miss
    pub fn account(&mut self, tx: &StoreTx, id: AccountId) -> StoreResult<Option<&Account>> {
        if !self.accounts.contains_key(&id) {
            match tx.account_by_id(id)? {
                Some(account) => {
                    self.by_address.insert(account.address.as_str().to_string(), id);
                    self.accounts.insert(id, account);
                }
                None => return Ok(None),
            }
        }
        self.touch(id);
        Ok(self.accounts.get(&id))
    }

    /// Mutable access; attaches the entry (dirty + pinned)
    pub fn account_mut(&mut self, tx: &StoreTx, id: AccountId) -> StoreResult<Option<&mut Account>> {
        if self.account(tx, id)?.is_none() {
            return Ok(None);
        }
        self.dirty_accounts.insert(id);
        Ok(self.accounts.get_mut(&id))
    }

    /// Id lookup by address, loading on miss
    pub fn account_id_by_address(
        &mut self,
        tx: &StoreTx,
        address: &Address,
    ) -> StoreResult<Option<AccountId>> {
        if let Some(&id) = self.by_address.get(address.as_str()) {
            return Ok(Some(id));
        }
        match tx.account_id_by_address(address.as_str())? {
            Some(id) => {
                // Pull the full row in so identity is preserved
                self.account(tx, id)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Find-or-create: unseen addresses allocate a fresh account at `level`
    pub fn resolve_account(
        &mut self,
        tx: &StoreTx,
        address: &Address,
        level: Level,
    ) -> StoreResult<AccountId> {
        if let Some(id) = self.account_id_by_address(tx, address)? {
            return Ok(id);
        }
        let id = self.app_state_mut().next_acct_id();
        let account = Account::new(id, address.clone(), level);
        self.insert_account(account);
        Ok(id)
    }

    /// Register a brand-new account (dirty from birth)
    pub fn insert_account(&mut self, account: Account) {
        let id = account.id;
        self.by_address.insert(account.address.as_str().to_string(), id);
        self.accounts.insert(id, account);
        self.dirty_accounts.insert(id);
        self.touch(id);
    }

    /// Evict by id after the row was deleted from the store
    pub fn drop_account(&mut self, id: AccountId) {
        if let Some(account) = self.accounts.remove(&id) {
            self.by_address.remove(account.address.as_str());
        }
        self.dirty_accounts.remove(&id);
        self.lru.retain(|&x| x != id);
    }

    // ---------------------------------------------------------------- proposals

    pub fn proposal(&mut self, tx: &StoreTx, id: i64) -> StoreResult<Option<&Proposal>> {
        if !self.proposals.contains_key(&id) {
            // Proposals are few; load the whole epoch's worth on demand
            let current_epoch = self.app_state.voting_epoch;
            for proposal in tx.proposals_of_epoch(current_epoch)? {
                self.by_proposal_hash
                    .insert((proposal.hash.as_str().to_string(), proposal.epoch), proposal.id);
                self.proposals.entry(proposal.id).or_insert(proposal);
            }
        }
        Ok(self.proposals.get(&id))
    }

    pub fn proposal_mut(&mut self, tx: &StoreTx, id: i64) -> StoreResult<Option<&mut Proposal>> {
        if self.proposal(tx, id)?.is_none() {
            return Ok(None);
        }
        self.dirty_proposals.insert(id);
        Ok(self.proposals.get_mut(&id))
    }

    pub fn proposal_id_by_hash(
        &mut self,
        tx: &StoreTx,
        hash: &ProposalHash,
        epoch: i32,
    ) -> StoreResult<Option<i64>> {
        let key = (hash.as_str().to_string(), epoch);
        if let Some(&id) = self.by_proposal_hash.get(&key) {
            return Ok(Some(id));
        }
        match tx.proposal_by_hash(hash, epoch)? {
            Some(proposal) => {
                let id = proposal.id;
                self.by_proposal_hash.insert(key, id);
                self.proposals.insert(id, proposal);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    pub fn insert_proposal(&mut self, proposal: Proposal) {
        self.by_proposal_hash
            .insert((proposal.hash.as_str().to_string(), proposal.epoch), proposal.id);
        self.dirty_proposals.insert(proposal.id);
        self.proposals.insert(proposal.id, proposal);
    }

    /// Next proposal id, aware of proposals created but not yet flushed
    pub fn allocate_proposal_id(&mut self, tx: &StoreTx) -> StoreResult<i64> {
        let store_next = tx.next_proposal_id()?;
        let cached_next = self.proposals.keys().max().map(|m| m + 1).unwrap_or(1);
        Ok(store_next.max(cached_next))
    }

    /// All proposals of an epoch, merged view of store and unflushed cache
    pub fn proposals_of_epoch(&mut self, tx: &StoreTx, epoch: i32) -> StoreResult<Vec<Proposal>> {
        for proposal in tx.proposals_of_epoch(epoch)? {
            if !self.proposals.contains_key(&proposal.id) {
                self.by_proposal_hash
                    .insert((proposal.hash.as_str().to_string(), proposal.epoch), proposal.id);
                self.proposals.insert(proposal.id, proposal);
            }
        }
        let mut out: Vec<Proposal> =
            self.proposals.values().filter(|p| p.epoch == epoch).cloned().collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    pub fn drop_proposal(&mut self, id: i64) {
        if let Some(p) = self.proposals.remove(&id) {
            self.by_proposal_hash.remove(&(p.hash.as_str().to_string(), p.epoch));
        }
        self.dirty_proposals.remove(&id);
    }

    // ---------------------------------------------------------------- periods

    pub fn period(&mut self, tx: &StoreTx, index: PeriodIndex) -> StoreResult<Option<&VotingPeriod>> {
        if !self.periods.contains_key(&index) {
            if let Some(period) = tx.period_at(index)? {
                self.periods.insert(index, period);
            } else {
                return Ok(None);
            }
        }
        Ok(self.periods.get(&index))
    }

    pub fn period_mut(
        &mut self,
        tx: &StoreTx,
        index: PeriodIndex,
    ) -> StoreResult<Option<&mut VotingPeriod>> {
        if self.period(tx, index)?.is_none() {
            return Ok(None);
        }
        self.dirty_periods.insert(index);
        Ok(self.periods.get_mut(&index))
    }

    pub fn insert_period(&mut self, period: VotingPeriod) {
        self.dirty_periods.insert(period.index);
        self.periods.insert(period.index, period);
    }

    pub fn drop_period(&mut self, index: PeriodIndex) {
        self.periods.remove(&index);
        self.dirty_periods.remove(&index);
    }

    // ---------------------------------------------------------------- lifecycle

    /// Write every dirty entry inside the block transaction, accounts first
    /// (op rows reference them by FK), then proposals, periods, app state
    pub fn flush(&mut self, tx: &StoreTx) -> StoreResult<()> {
        for &id in &self.dirty_accounts {
            if let Some(account) = self.accounts.get(&id) {
                tx.upsert_account(account)?;
            }
        }
        for &id in &self.dirty_proposals {
            if let Some(proposal) = self.proposals.get(&id) {
                tx.upsert_proposal(proposal)?;
            }
        }
        for &index in &self.dirty_periods {
            if let Some(period) = self.periods.get(&index) {
                tx.upsert_period(period)?;
            }
        }
        if self.app_dirty {
            tx.save_app_state(&self.app_state)?;
        }
        Ok(())
    }

    /// The transaction committed: clear dirty flags and trim clean entries
    pub fn confirm(&mut self) {
        self.dirty_accounts.clear();
        self.dirty_proposals.clear();
        self.dirty_periods.clear();
        self.app_dirty = false;
        self.evict_clean();
    }

    /// The transaction failed: drop everything dirty so it is refetched
    pub fn invalidate(&mut self, durable_app_state: AppState) {
        let dirty: Vec<AccountId> = self.dirty_accounts.iter().copied().collect();
        for id in dirty {
            self.drop_account(id);
        }
        let dirty: Vec<i64> = self.dirty_proposals.iter().copied().collect();
        for id in dirty {
            self.drop_proposal(id);
        }
        let dirty: Vec<PeriodIndex> = self.dirty_periods.iter().copied().collect();
        for index in dirty {
            self.drop_period(index);
        }
        self.app_state = durable_app_state;
        self.app_dirty = false;
    }

    fn evict_clean(&mut self) {
        while self.accounts.len() > self.capacity {
            let Some(id) = self.lru.iter().copied().find(|id| !self.dirty_accounts.contains(id))
            else {
                break;
            };
            debug!(account = id, "Evicting clean cache entry");
            self.drop_account(id);
        }
    }

    #[cfg(test)]
    pub fn cached_accounts(&self) -> usize {
        self.accounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn address(i: usize) -> Address {
        let alphabet = "abcdefghijkmnopqrstuvwxyz";
        let c = alphabet.as_bytes()[i % alphabet.len()] as char;
        let d = alphabet.as_bytes()[(i / alphabet.len()) % alphabet.len()] as char;
        Address::new(format!("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZ{d}{c}")).unwrap()
    }

    #[test]
    fn resolve_allocates_once_and_preserves_identity() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();
        let mut cache = EntityCache::new(AppState::bootstrap(1));

        let a = cache.resolve_account(&tx, &address(0), 5).unwrap();
        let b = cache.resolve_account(&tx, &address(0), 6).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.app_state().next_account_id, 2);

        cache.account_mut(&tx, a).unwrap().unwrap().balance = 77;
        assert_eq!(cache.account(&tx, a).unwrap().unwrap().balance, 77);
    }

    #[test]
    fn flush_persists_dirty_entries() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();
        let mut cache = EntityCache::new(AppState::bootstrap(1));

        let id = cache.resolve_account(&tx, &address(1), 5).unwrap();
        cache.account_mut(&tx, id).unwrap().unwrap().balance = 1234;
        cache.flush(&tx).unwrap();
        cache.confirm();

        assert_eq!(tx.account_by_id(id).unwrap().unwrap().balance, 1234);
        // State row went along
        assert_eq!(tx.get_app_state().unwrap().unwrap().next_account_id, 2);
    }

    #[test]
    fn invalidate_drops_dirty_entries() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();
        let mut cache = EntityCache::new(AppState::bootstrap(1));

        let id = cache.resolve_account(&tx, &address(2), 5).unwrap();
        cache.account_mut(&tx, id).unwrap().unwrap().balance = 999;
        cache.invalidate(AppState::bootstrap(1));

        // Entry is gone and the id allocation was rolled back with app state
        assert_eq!(cache.cached_accounts(), 0);
        assert_eq!(cache.app_state().next_account_id, 1);
    }

    #[test]
    fn clean_entries_evict_beyond_capacity_dirty_are_pinned() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();
        let mut cache = EntityCache::with_capacity(AppState::bootstrap(1), 4);

        let dirty_id = cache.resolve_account(&tx, &address(3), 1).unwrap();
        for i in 4..12 {
            cache.resolve_account(&tx, &address(i), 1).unwrap();
        }
        cache.flush(&tx).unwrap();
        // Pretend only the first entry stays dirty
        cache.confirm();
        cache.account_mut(&tx, dirty_id).unwrap().unwrap().balance = 1;
        for i in 12..20 {
            cache.resolve_account(&tx, &address(i), 1).unwrap();
        }
        cache.flush(&tx).unwrap();
        cache.confirm();

        assert!(cache.cached_accounts() <= 4);
    }
}
