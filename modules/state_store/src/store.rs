//! Relational store over SQLite
//!
//! All writes happen inside a [`StoreTx`]; dropping one without commit rolls
//! the whole block back. Reads share the same code paths via plain
//! connection access.

use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use std::path::Path;
use tessera_common::{
    Account, AccountDetails, AccountId, AccountType, Address, AppState, BakingRight, BlockHash,
    BlockRow, ContractInfo, ContractKind, Cycle, CycleIndex, DelegateInfo, DelegateSnapshot,
    EndorsingRight, FrozenBalance, Level, NonceCommitment, OpHash, OpId, OpKind, OpPayload,
    OpStatus, Operation, OperationsMask, PeriodIndex, Proposal, ProposalHash, Protocol,
    ProtocolHash, Quote, RightStatus, VoterStatus, VotingPeriod, VotingSnapshot,
    operation::{
        ActivationOp, BallotOp, DelegationOp, DoubleBakingOp, DoubleEndorsingOp, EndorsementOp,
        MigrationKind, MigrationOp, NonceRevelationOp, OriginationOp, ProposalsOp,
        RegisterConstantOp, RevealOp, TransactionOp,
    },
};

const SCHEMA: &str = include_str!("schema.sql");

/// Owns the SQLite connection
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        // journal_mode returns the resulting mode (e.g. "memory" for in-memory
        // connections), so it cannot go through plain pragma_update
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Start a block-scoped transaction
    pub fn begin(&mut self) -> StoreResult<StoreTx<'_>> {
        Ok(StoreTx {
            tx: self.conn.transaction()?,
        })
    }

    /// Durable head pointer, if the store was ever initialized
    pub fn app_state(&self) -> StoreResult<Option<AppState>> {
        sql::get_app_state(&self.conn)
    }

    pub fn protocols(&self) -> StoreResult<Vec<Protocol>> {
        sql::protocols(&self.conn)
    }

    pub fn block_at(&self, level: Level) -> StoreResult<Option<BlockRow>> {
        sql::block_at(&self.conn, level)
    }

    pub fn account_by_address(&self, address: &str) -> StoreResult<Option<Account>> {
        match sql::account_id_by_address(&self.conn, address)? {
            Some(id) => sql::account_by_id(&self.conn, id),
            None => Ok(None),
        }
    }

    pub fn accounts(&self) -> StoreResult<Vec<Account>> {
        sql::accounts(&self.conn)
    }

    pub fn operations_at_level(&self, level: Level) -> StoreResult<Vec<Operation>> {
        sql::operations_at_level(&self.conn, level)
    }

    pub fn period_at(&self, index: PeriodIndex) -> StoreResult<Option<VotingPeriod>> {
        sql::period_at(&self.conn, index)
    }

    pub fn proposals_of_epoch(&self, epoch: i32) -> StoreResult<Vec<Proposal>> {
        sql::proposals_of_epoch(&self.conn, epoch)
    }

    pub fn voting_snapshot(
        &self,
        period: PeriodIndex,
        baker: AccountId,
    ) -> StoreResult<Option<VotingSnapshot>> {
        sql::voting_snapshot(&self.conn, period, baker)
    }

    pub fn cycle_at(&self, index: CycleIndex) -> StoreResult<Option<Cycle>> {
        sql::cycle_at(&self.conn, index)
    }

    pub fn frozen(&self, cycle: CycleIndex, baker: AccountId) -> StoreResult<Option<FrozenBalance>> {
        sql::frozen(&self.conn, cycle, baker)
    }

    pub fn baking_rights_at(&self, level: Level) -> StoreResult<Vec<BakingRight>> {
        sql::baking_rights_at(&self.conn, level)
    }

    pub fn endorsing_rights_at(&self, level: Level) -> StoreResult<Vec<EndorsingRight>> {
        sql::endorsing_rights_at(&self.conn, level)
    }

    pub fn quote_at(&self, level: Level) -> StoreResult<Option<Quote>> {
        sql::quote_at(&self.conn, level)
    }

    pub fn nonce_at(&self, level: Level) -> StoreResult<Option<NonceCommitment>> {
        sql::nonce_at(&self.conn, level)
    }
}

/// One database transaction wrapping a single block apply or revert
pub struct StoreTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

macro_rules! delegate {
    ($( $(#[$doc:meta])* pub fn $name:ident ( &self $(, $arg:ident : $ty:ty)* $(,)? ) -> $ret:ty; )+) => {
        $(
            $(#[$doc])*
            pub fn $name(&self $(, $arg: $ty)*) -> $ret {
                sql::$name(&self.tx $(, $arg)*)
            }
        )+
    };
}

impl<'c> StoreTx<'c> {
    pub fn commit(self) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    delegate! {
        pub fn save_app_state(&self, state: &AppState) -> StoreResult<()>;
        pub fn get_app_state(&self) -> StoreResult<Option<AppState>>;

        pub fn upsert_protocol(&self, protocol: &Protocol) -> StoreResult<()>;
        pub fn protocols(&self) -> StoreResult<Vec<Protocol>>;
        pub fn protocol_by_hash(&self, hash: &ProtocolHash) -> StoreResult<Option<Protocol>>;
        pub fn current_protocol(&self) -> StoreResult<Option<Protocol>>;
        pub fn delete_protocol(&self, code: i32) -> StoreResult<()>;

        pub fn insert_block(&self, block: &BlockRow) -> StoreResult<()>;
        pub fn block_at(&self, level: Level) -> StoreResult<Option<BlockRow>>;
        pub fn delete_block(&self, level: Level) -> StoreResult<()>;

        pub fn upsert_account(&self, account: &Account) -> StoreResult<()>;
        pub fn account_by_id(&self, id: AccountId) -> StoreResult<Option<Account>>;
        pub fn account_id_by_address(&self, address: &str) -> StoreResult<Option<AccountId>>;
        pub fn delete_account(&self, id: AccountId) -> StoreResult<()>;
        pub fn delegates(&self) -> StoreResult<Vec<Account>>;
        pub fn fresh_account_ids(&self, level: Level) -> StoreResult<Vec<AccountId>>;
        pub fn last_activity_of(&self, id: AccountId) -> StoreResult<Option<Level>>;

        pub fn insert_operation(&self, op: &Operation) -> StoreResult<()>;
        pub fn delete_operation(&self, kind: OpKind, id: OpId) -> StoreResult<()>;
        pub fn operations_at_level(&self, level: Level) -> StoreResult<Vec<Operation>>;
        pub fn upvote_exists(&self, period: PeriodIndex, sender: AccountId, proposal: i64) -> StoreResult<bool>;
        pub fn earlier_proposal_op_exists(&self, period: PeriodIndex, sender: AccountId, before: OpId) -> StoreResult<bool>;

        pub fn insert_cycle(&self, cycle: &Cycle) -> StoreResult<()>;
        pub fn cycle_at(&self, index: CycleIndex) -> StoreResult<Option<Cycle>>;
        pub fn delete_cycle(&self, index: CycleIndex) -> StoreResult<()>;

        pub fn upsert_period(&self, period: &VotingPeriod) -> StoreResult<()>;
        pub fn period_at(&self, index: PeriodIndex) -> StoreResult<Option<VotingPeriod>>;
        pub fn delete_period(&self, index: PeriodIndex) -> StoreResult<()>;

        pub fn upsert_proposal(&self, proposal: &Proposal) -> StoreResult<()>;
        pub fn proposal_by_hash(&self, hash: &ProposalHash, epoch: i32) -> StoreResult<Option<Proposal>>;
        pub fn proposals_of_epoch(&self, epoch: i32) -> StoreResult<Vec<Proposal>>;
        pub fn delete_proposal(&self, id: i64) -> StoreResult<()>;
        pub fn next_proposal_id(&self) -> StoreResult<i64>;

        pub fn insert_voting_snapshots(&self, rows: &[VotingSnapshot]) -> StoreResult<()>;
        pub fn delete_voting_snapshots(&self, period: PeriodIndex) -> StoreResult<()>;
        pub fn voting_snapshot(&self, period: PeriodIndex, baker: AccountId) -> StoreResult<Option<VotingSnapshot>>;
        pub fn set_snapshot_status(&self, period: PeriodIndex, baker: AccountId, status: VoterStatus) -> StoreResult<()>;

        pub fn insert_baking_rights(&self, rows: &[BakingRight]) -> StoreResult<()>;
        pub fn insert_endorsing_rights(&self, rows: &[EndorsingRight]) -> StoreResult<()>;
        pub fn delete_rights_of_cycle(&self, cycle: CycleIndex) -> StoreResult<()>;
        pub fn baking_rights_at(&self, level: Level) -> StoreResult<Vec<BakingRight>>;
        pub fn endorsing_rights_at(&self, level: Level) -> StoreResult<Vec<EndorsingRight>>;
        pub fn set_baking_right_status(&self, level: Level, priority: i32, status: RightStatus) -> StoreResult<()>;
        pub fn set_endorsing_right_status(&self, level: Level, baker: AccountId, status: RightStatus) -> StoreResult<()>;
        pub fn reset_rights_at(&self, level: Level) -> StoreResult<()>;

        pub fn insert_delegate_snapshots(&self, rows: &[DelegateSnapshot]) -> StoreResult<()>;
        pub fn delete_delegate_snapshots(&self, cycle: CycleIndex) -> StoreResult<()>;
        pub fn delegate_snapshots_of(&self, cycle: CycleIndex) -> StoreResult<Vec<DelegateSnapshot>>;

        pub fn upsert_frozen(&self, row: &FrozenBalance) -> StoreResult<()>;
        pub fn frozen(&self, cycle: CycleIndex, baker: AccountId) -> StoreResult<Option<FrozenBalance>>;
        pub fn frozen_of_cycle(&self, cycle: CycleIndex) -> StoreResult<Vec<FrozenBalance>>;
        pub fn frozen_unfrozen_at(&self, level: Level) -> StoreResult<Vec<FrozenBalance>>;
        pub fn delete_frozen(&self, cycle: CycleIndex, baker: AccountId) -> StoreResult<()>;

        pub fn upsert_nonce(&self, row: &NonceCommitment) -> StoreResult<()>;
        pub fn nonce_at(&self, level: Level) -> StoreResult<Option<NonceCommitment>>;
        pub fn delete_nonce(&self, level: Level) -> StoreResult<()>;
        pub fn nonces_of_cycle(&self, cycle: CycleIndex) -> StoreResult<Vec<NonceCommitment>>;
        pub fn nonces_penalized_at(&self, level: Level) -> StoreResult<Vec<NonceCommitment>>;

        pub fn upsert_quote(&self, quote: &Quote) -> StoreResult<()>;
        pub fn quote_at(&self, level: Level) -> StoreResult<Option<Quote>>;
        pub fn delete_quote(&self, level: Level) -> StoreResult<()>;
    }
}

/// Row-level SQL, shared by [`Store`] and [`StoreTx`]
mod sql {
    use super::*;

    fn conv<E: std::fmt::Display>(idx: usize) -> impl FnOnce(E) -> rusqlite::Error {
        move |e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("{e}").into(),
            )
        }
    }

    fn tag<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
    where
        T: TryFrom<u8>,
        T::Error: std::fmt::Display,
    {
        let raw: i64 = row.get(idx)?;
        T::try_from(raw as u8).map_err(conv(idx))
    }

    // ---------------------------------------------------------------- app state

    pub fn save_app_state(conn: &Connection, state: &AppState) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO app_state (id, level, hash, protocol, timestamp,
                next_operation_id, next_account_id, manager_counter, known_head,
                voting_epoch, chain_id)
             VALUES (1, :level, :hash, :protocol, :timestamp, :next_op, :next_acct,
                :manager_counter, :known_head, :voting_epoch, :chain_id)",
            named_params! {
                ":level": state.level,
                ":hash": state.hash.as_ref().map(|h| h.as_str()),
                ":protocol": state.protocol.as_ref().map(|h| h.as_str()),
                ":timestamp": state.timestamp,
                ":next_op": state.next_operation_id,
                ":next_acct": state.next_account_id,
                ":manager_counter": state.manager_counter,
                ":known_head": state.known_head,
                ":voting_epoch": state.voting_epoch,
                ":chain_id": state.chain_id,
            },
        )?;
        Ok(())
    }

    pub fn get_app_state(conn: &Connection) -> StoreResult<Option<AppState>> {
        conn.query_row(
            "SELECT level, hash, protocol, timestamp, next_operation_id, next_account_id,
                    manager_counter, known_head, voting_epoch, chain_id
             FROM app_state WHERE id = 1",
            [],
            |row| {
                Ok(AppState {
                    level: row.get(0)?,
                    hash: row
                        .get::<_, Option<String>>(1)?
                        .map(|h| BlockHash::new(h).map_err(conv(1)))
                        .transpose()?,
                    protocol: row
                        .get::<_, Option<String>>(2)?
                        .map(|h| ProtocolHash::new(h).map_err(conv(2)))
                        .transpose()?,
                    timestamp: row.get(3)?,
                    next_operation_id: row.get(4)?,
                    next_account_id: row.get(5)?,
                    manager_counter: row.get(6)?,
                    known_head: row.get(7)?,
                    voting_epoch: row.get(8)?,
                    chain_id: row.get(9)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    // ---------------------------------------------------------------- protocols

    pub fn upsert_protocol(conn: &Connection, protocol: &Protocol) -> StoreResult<()> {
        let constants = serde_json::to_string(&protocol.constants).map_err(StoreError::encoding)?;
        conn.execute(
            "INSERT OR REPLACE INTO protocols (code, hash, first_level, last_level, constants)
             VALUES (:code, :hash, :first, :last, :constants)",
            named_params! {
                ":code": protocol.code,
                ":hash": protocol.hash.as_str(),
                ":first": protocol.first_level,
                ":last": protocol.last_level,
                ":constants": constants,
            },
        )?;
        Ok(())
    }

    fn protocol_from_row(row: &Row) -> rusqlite::Result<Protocol> {
        Ok(Protocol {
            code: row.get(0)?,
            hash: ProtocolHash::new(row.get::<_, String>(1)?).map_err(conv(1))?,
            first_level: row.get(2)?,
            last_level: row.get(3)?,
            constants: serde_json::from_str(&row.get::<_, String>(4)?).map_err(conv(4))?,
        })
    }

    const PROTOCOL_COLS: &str = "code, hash, first_level, last_level, constants";

    pub fn protocols(conn: &Connection) -> StoreResult<Vec<Protocol>> {
        let mut stmt =
            conn.prepare(&format!("SELECT {PROTOCOL_COLS} FROM protocols ORDER BY code"))?;
        let rows = stmt.query_map([], protocol_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn protocol_by_hash(
        conn: &Connection,
        hash: &ProtocolHash,
    ) -> StoreResult<Option<Protocol>> {
        conn.query_row(
            &format!("SELECT {PROTOCOL_COLS} FROM protocols WHERE hash = :hash"),
            named_params! { ":hash": hash.as_str() },
            protocol_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn current_protocol(conn: &Connection) -> StoreResult<Option<Protocol>> {
        conn.query_row(
            &format!("SELECT {PROTOCOL_COLS} FROM protocols ORDER BY code DESC LIMIT 1"),
            [],
            protocol_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_protocol(conn: &Connection, code: i32) -> StoreResult<()> {
        conn.execute("DELETE FROM protocols WHERE code = :code", named_params! { ":code": code })?;
        Ok(())
    }

    // ---------------------------------------------------------------- blocks

    pub fn insert_block(conn: &Connection, block: &BlockRow) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO blocks (level, hash, predecessor, timestamp, proto_code, baker_id,
                priority, validation_passes, reward, fees, deposit, operations, cycle,
                cycle_position, voting_period_index, voting_period_position,
                seed_nonce_hash, lb_escape_vote, lb_escape_ema)
             VALUES (:level, :hash, :predecessor, :timestamp, :proto, :baker, :priority,
                :passes, :reward, :fees, :deposit, :operations, :cycle, :cycle_pos,
                :vp_index, :vp_pos, :nonce_hash, :lb_vote, :lb_ema)",
            named_params! {
                ":level": block.level,
                ":hash": block.hash.as_str(),
                ":predecessor": block.predecessor.as_str(),
                ":timestamp": block.timestamp,
                ":proto": block.proto_code,
                ":baker": block.baker_id,
                ":priority": block.priority,
                ":passes": block.validation_passes,
                ":reward": block.reward,
                ":fees": block.fees,
                ":deposit": block.deposit,
                ":operations": u32::from(block.operations) as i64,
                ":cycle": block.cycle,
                ":cycle_pos": block.cycle_position,
                ":vp_index": block.voting_period_index,
                ":vp_pos": block.voting_period_position,
                ":nonce_hash": block.seed_nonce_hash,
                ":lb_vote": block.lb_escape_vote,
                ":lb_ema": block.lb_escape_ema,
            },
        )?;
        Ok(())
    }

    pub fn block_at(conn: &Connection, level: Level) -> StoreResult<Option<BlockRow>> {
        conn.query_row(
            "SELECT level, hash, predecessor, timestamp, proto_code, baker_id, priority,
                    validation_passes, reward, fees, deposit, operations, cycle,
                    cycle_position, voting_period_index, voting_period_position,
                    seed_nonce_hash, lb_escape_vote, lb_escape_ema
             FROM blocks WHERE level = :level",
            named_params! { ":level": level },
            |row| {
                Ok(BlockRow {
                    level: row.get(0)?,
                    hash: BlockHash::new(row.get::<_, String>(1)?).map_err(conv(1))?,
                    predecessor: BlockHash::new(row.get::<_, String>(2)?).map_err(conv(2))?,
                    timestamp: row.get(3)?,
                    proto_code: row.get(4)?,
                    baker_id: row.get(5)?,
                    priority: row.get(6)?,
                    validation_passes: row.get(7)?,
                    reward: row.get(8)?,
                    fees: row.get(9)?,
                    deposit: row.get(10)?,
                    operations: OperationsMask::from(row.get::<_, i64>(11)? as u32),
                    cycle: row.get(12)?,
                    cycle_position: row.get(13)?,
                    voting_period_index: row.get(14)?,
                    voting_period_position: row.get(15)?,
                    seed_nonce_hash: row.get(16)?,
                    lb_escape_vote: row.get(17)?,
                    lb_escape_ema: row.get(18)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_block(conn: &Connection, level: Level) -> StoreResult<()> {
        conn.execute("DELETE FROM blocks WHERE level = :level", named_params! { ":level": level })?;
        Ok(())
    }

    // ---------------------------------------------------------------- accounts

    const ACCOUNT_COLS: &str = "id, address, type, first_level, last_level, balance, counter,
        pubkey, delegate_id,
        transactions_count, originations_count, delegations_count, reveals_count,
        endorsements_count, proposals_count, ballots_count, double_bakings_count,
        double_endorsings_count, nonce_revelations_count, activations_count,
        migrations_count, register_constants_count,
        staking_balance, delegators_count, active_since, deactivation_level,
        frozen_deposits, frozen_rewards, frozen_fees, blocks_count,
        contract_kind, creator_id, manager_id, script, storage, type_hash, code_hash";

    fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
        let account_type: AccountType = tag(row, 2)?;
        let details = match account_type {
            AccountType::User => AccountDetails::User,
            AccountType::Ghost => AccountDetails::Ghost,
            AccountType::Delegate => AccountDetails::Delegate(DelegateInfo {
                staking_balance: row.get::<_, Option<i64>>(22)?.unwrap_or(0),
                delegators_count: row.get::<_, Option<i32>>(23)?.unwrap_or(0),
                active_since: row.get::<_, Option<i64>>(24)?.unwrap_or(0),
                deactivation_level: row.get(25)?,
                frozen_deposits: row.get::<_, Option<i64>>(26)?.unwrap_or(0),
                frozen_rewards: row.get::<_, Option<i64>>(27)?.unwrap_or(0),
                frozen_fees: row.get::<_, Option<i64>>(28)?.unwrap_or(0),
                blocks_count: row.get::<_, Option<i32>>(29)?.unwrap_or(0),
            }),
            AccountType::Contract => AccountDetails::Contract(ContractInfo {
                kind: {
                    let raw: i64 = row.get::<_, Option<i64>>(30)?.unwrap_or(1);
                    ContractKind::try_from(raw as u8).map_err(conv(30))?
                },
                creator_id: row.get::<_, Option<i64>>(31)?.unwrap_or(0),
                manager_id: row.get(32)?,
                script: row.get(33)?,
                storage: row.get(34)?,
                type_hash: row.get::<_, Option<i32>>(35)?.unwrap_or(0),
                code_hash: row.get::<_, Option<i32>>(36)?.unwrap_or(0),
            }),
        };
        Ok(Account {
            id: row.get(0)?,
            address: Address::new(row.get::<_, String>(1)?).map_err(conv(1))?,
            first_level: row.get(3)?,
            last_level: row.get(4)?,
            balance: row.get(5)?,
            counter: row.get(6)?,
            pubkey: row.get(7)?,
            delegate_id: row.get(8)?,
            counts: tessera_common::OperationCounts {
                transactions: row.get(9)?,
                originations: row.get(10)?,
                delegations: row.get(11)?,
                reveals: row.get(12)?,
                endorsements: row.get(13)?,
                proposals: row.get(14)?,
                ballots: row.get(15)?,
                double_bakings: row.get(16)?,
                double_endorsings: row.get(17)?,
                nonce_revelations: row.get(18)?,
                activations: row.get(19)?,
                migrations: row.get(20)?,
                register_constants: row.get(21)?,
            },
            details,
        })
    }

    pub fn upsert_account(conn: &Connection, account: &Account) -> StoreResult<()> {
        let delegate = account.delegate();
        let contract = account.contract();
        conn.execute(
            "INSERT OR REPLACE INTO accounts (id, address, type, first_level, last_level,
                balance, counter, pubkey, delegate_id,
                transactions_count, originations_count, delegations_count, reveals_count,
                endorsements_count, proposals_count, ballots_count, double_bakings_count,
                double_endorsings_count, nonce_revelations_count, activations_count,
                migrations_count, register_constants_count,
                staking_balance, delegators_count, active_since, deactivation_level,
                frozen_deposits, frozen_rewards, frozen_fees, blocks_count,
                contract_kind, creator_id, manager_id, script, storage, type_hash, code_hash)
             VALUES (:id, :address, :type, :first_level, :last_level, :balance, :counter,
                :pubkey, :delegate_id,
                :tx_count, :orig_count, :deleg_count, :reveal_count, :endors_count,
                :prop_count, :ballot_count, :db_count, :de_count, :nonce_count,
                :act_count, :migr_count, :rc_count,
                :staking_balance, :delegators_count, :active_since, :deactivation_level,
                :frozen_deposits, :frozen_rewards, :frozen_fees, :blocks_count,
                :contract_kind, :creator_id, :manager_id, :script, :storage,
                :type_hash, :code_hash)",
            named_params! {
                ":id": account.id,
                ":address": account.address.as_str(),
                ":type": u8::from(account.account_type()) as i64,
                ":first_level": account.first_level,
                ":last_level": account.last_level,
                ":balance": account.balance,
                ":counter": account.counter,
                ":pubkey": account.pubkey,
                ":delegate_id": account.delegate_id,
                ":tx_count": account.counts.transactions,
                ":orig_count": account.counts.originations,
                ":deleg_count": account.counts.delegations,
                ":reveal_count": account.counts.reveals,
                ":endors_count": account.counts.endorsements,
                ":prop_count": account.counts.proposals,
                ":ballot_count": account.counts.ballots,
                ":db_count": account.counts.double_bakings,
                ":de_count": account.counts.double_endorsings,
                ":nonce_count": account.counts.nonce_revelations,
                ":act_count": account.counts.activations,
                ":migr_count": account.counts.migrations,
                ":rc_count": account.counts.register_constants,
                ":staking_balance": delegate.map(|d| d.staking_balance),
                ":delegators_count": delegate.map(|d| d.delegators_count),
                ":active_since": delegate.map(|d| d.active_since),
                ":deactivation_level": delegate.and_then(|d| d.deactivation_level),
                ":frozen_deposits": delegate.map(|d| d.frozen_deposits),
                ":frozen_rewards": delegate.map(|d| d.frozen_rewards),
                ":frozen_fees": delegate.map(|d| d.frozen_fees),
                ":blocks_count": delegate.map(|d| d.blocks_count),
                ":contract_kind": contract.map(|c| u8::from(c.kind) as i64),
                ":creator_id": contract.map(|c| c.creator_id),
                ":manager_id": contract.and_then(|c| c.manager_id),
                ":script": contract.and_then(|c| c.script.as_deref()),
                ":storage": contract.and_then(|c| c.storage.as_deref()),
                ":type_hash": contract.map(|c| c.type_hash),
                ":code_hash": contract.map(|c| c.code_hash),
            },
        )?;
        Ok(())
    }

    pub fn account_by_id(conn: &Connection, id: AccountId) -> StoreResult<Option<Account>> {
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = :id"),
            named_params! { ":id": id },
            account_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn account_id_by_address(
        conn: &Connection,
        address: &str,
    ) -> StoreResult<Option<AccountId>> {
        conn.query_row(
            "SELECT id FROM accounts WHERE address = :address",
            named_params! { ":address": address },
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_account(conn: &Connection, id: AccountId) -> StoreResult<()> {
        conn.execute("DELETE FROM accounts WHERE id = :id", named_params! { ":id": id })?;
        Ok(())
    }

    pub fn delegates(conn: &Connection) -> StoreResult<Vec<Account>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLS} FROM accounts WHERE type = 1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn accounts(conn: &Connection) -> StoreResult<Vec<Account>> {
        let mut stmt = conn.prepare(&format!("SELECT {ACCOUNT_COLS} FROM accounts ORDER BY id"))?;
        let rows = stmt.query_map([], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Accounts first seen at this level that carry no remaining activity -
    /// candidates for deletion when the level is reverted
    pub fn fresh_account_ids(conn: &Connection, level: Level) -> StoreResult<Vec<AccountId>> {
        let mut stmt = conn.prepare(
            "SELECT id FROM accounts
             WHERE first_level = :level AND balance = 0
               AND transactions_count = 0 AND originations_count = 0
               AND delegations_count = 0 AND reveals_count = 0
               AND endorsements_count = 0 AND proposals_count = 0
               AND ballots_count = 0 AND double_bakings_count = 0
               AND double_endorsings_count = 0 AND nonce_revelations_count = 0
               AND activations_count = 0 AND migrations_count = 0
               AND register_constants_count = 0
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(named_params! { ":level": level }, |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Highest level at which this account still appears in any op table
    pub fn last_activity_of(conn: &Connection, id: AccountId) -> StoreResult<Option<Level>> {
        conn.query_row(
            "SELECT MAX(level) FROM (
                SELECT level FROM transaction_ops WHERE sender_id = :id OR target_id = :id
                UNION ALL SELECT level FROM origination_ops WHERE sender_id = :id OR contract_id = :id
                UNION ALL SELECT level FROM delegation_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM reveal_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM endorsement_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM proposal_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM ballot_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM double_baking_ops
                    WHERE sender_id = :id OR offender_id = :id OR accuser_id = :id
                UNION ALL SELECT level FROM double_endorsing_ops
                    WHERE sender_id = :id OR offender_id = :id OR accuser_id = :id
                UNION ALL SELECT level FROM nonce_revelation_ops
                    WHERE sender_id = :id OR baker_id = :id
                UNION ALL SELECT level FROM activation_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM migration_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM register_constant_ops WHERE sender_id = :id
                UNION ALL SELECT level FROM blocks WHERE baker_id = :id
             )",
            named_params! { ":id": id },
            |row| row.get::<_, Option<i64>>(0),
        )
        .map_err(StoreError::from)
    }

    // ---------------------------------------------------------------- operations

    const OP_COMMON_COLS: &str = "id, level, cycle, timestamp, hash, sender_id, status, errors,
        baker_fee, storage_fee, allocation_fee, counter";

    pub fn op_table(kind: OpKind) -> &'static str {
        match kind {
            OpKind::Transaction => "transaction_ops",
            OpKind::Origination => "origination_ops",
            OpKind::Delegation => "delegation_ops",
            OpKind::Reveal => "reveal_ops",
            OpKind::Endorsement => "endorsement_ops",
            OpKind::Proposals => "proposal_ops",
            OpKind::Ballot => "ballot_ops",
            OpKind::DoubleBaking => "double_baking_ops",
            OpKind::DoubleEndorsing => "double_endorsing_ops",
            OpKind::NonceRevelation => "nonce_revelation_ops",
            OpKind::Activation => "activation_ops",
            OpKind::Migration => "migration_ops",
            OpKind::RegisterConstant => "register_constant_ops",
        }
    }

    struct OpCommon {
        id: OpId,
        level: Level,
        cycle: CycleIndex,
        timestamp: i64,
        hash: Option<OpHash>,
        sender_id: AccountId,
        status: OpStatus,
        errors: Option<String>,
        baker_fee: i64,
        storage_fee: i64,
        allocation_fee: i64,
        counter: Option<i64>,
    }

    fn op_common(row: &Row) -> rusqlite::Result<OpCommon> {
        Ok(OpCommon {
            id: row.get(0)?,
            level: row.get(1)?,
            cycle: row.get(2)?,
            timestamp: row.get(3)?,
            hash: row
                .get::<_, Option<String>>(4)?
                .map(|h| OpHash::new(h).map_err(conv(4)))
                .transpose()?,
            sender_id: row.get(5)?,
            status: tag(row, 6)?,
            errors: row.get(7)?,
            baker_fee: row.get(8)?,
            storage_fee: row.get(9)?,
            allocation_fee: row.get(10)?,
            counter: row.get(11)?,
        })
    }

    fn into_operation(common: OpCommon, payload: OpPayload) -> Operation {
        Operation {
            id: common.id,
            level: common.level,
            cycle: common.cycle,
            timestamp: common.timestamp,
            hash: common.hash,
            sender_id: common.sender_id,
            status: common.status,
            errors: common.errors,
            baker_fee: common.baker_fee,
            storage_fee: common.storage_fee,
            allocation_fee: common.allocation_fee,
            counter: common.counter,
            payload,
        }
    }

    const COMMON_NAMES: &str = ":id, :level, :cycle, :timestamp, :hash, :sender_id,
        :status, :errors, :baker_fee, :storage_fee, :allocation_fee, :counter";

    /// Bind the shared column prefix plus kind-specific params and execute
    fn insert_with(
        conn: &Connection,
        sql: &str,
        op: &Operation,
        extra: &[(&str, &dyn rusqlite::ToSql)],
    ) -> StoreResult<()> {
        let status = u8::from(op.status) as i64;
        let hash = op.hash.as_ref().map(|h| h.as_str());
        let mut params: Vec<(&str, &dyn rusqlite::ToSql)> = vec![
            (":id", &op.id),
            (":level", &op.level),
            (":cycle", &op.cycle),
            (":timestamp", &op.timestamp),
            (":hash", &hash),
            (":sender_id", &op.sender_id),
            (":status", &status),
            (":errors", &op.errors),
            (":baker_fee", &op.baker_fee),
            (":storage_fee", &op.storage_fee),
            (":allocation_fee", &op.allocation_fee),
            (":counter", &op.counter),
        ];
        params.extend_from_slice(extra);
        conn.execute(sql, params.as_slice())?;
        Ok(())
    }

    pub fn insert_operation(conn: &Connection, op: &Operation) -> StoreResult<()> {
        match &op.payload {
            OpPayload::Transaction(t) => insert_with(
                conn,
                &format!(
                    "INSERT INTO transaction_ops ({OP_COMMON_COLS}, target_id, amount,
                        entrypoint, parameters, allocated_target, internal_nonce)
                     VALUES ({COMMON_NAMES}, :target_id, :amount, :entrypoint,
                        :parameters, :allocated_target, :internal_nonce)"
                ),
                op,
                &[
                    (":target_id", &t.target_id),
                    (":amount", &t.amount),
                    (":entrypoint", &t.entrypoint),
                    (":parameters", &t.parameters),
                    (":allocated_target", &t.allocated_target),
                    (":internal_nonce", &t.internal_nonce),
                ],
            ),
            OpPayload::Origination(o) => insert_with(
                conn,
                &format!(
                    "INSERT INTO origination_ops ({OP_COMMON_COLS}, contract_id, delegate_id,
                        balance, script, storage, internal_nonce)
                     VALUES ({COMMON_NAMES}, :contract_id, :delegate_id, :balance,
                        :script, :storage, :internal_nonce)"
                ),
                op,
                &[
                    (":contract_id", &o.contract_id),
                    (":delegate_id", &o.delegate_id),
                    (":balance", &o.balance),
                    (":script", &o.script),
                    (":storage", &o.storage),
                    (":internal_nonce", &o.internal_nonce),
                ],
            ),
            OpPayload::Delegation(d) => insert_with(
                conn,
                &format!(
                    "INSERT INTO delegation_ops ({OP_COMMON_COLS}, new_delegate_id,
                        prev_delegate_id, registered_delegate, internal_nonce)
                     VALUES ({COMMON_NAMES}, :new_delegate_id, :prev_delegate_id,
                        :registered_delegate, :internal_nonce)"
                ),
                op,
                &[
                    (":new_delegate_id", &d.new_delegate_id),
                    (":prev_delegate_id", &d.prev_delegate_id),
                    (":registered_delegate", &d.registered_delegate),
                    (":internal_nonce", &d.internal_nonce),
                ],
            ),
            OpPayload::Reveal(r) => insert_with(
                conn,
                &format!(
                    "INSERT INTO reveal_ops ({OP_COMMON_COLS}, public_key)
                     VALUES ({COMMON_NAMES}, :public_key)"
                ),
                op,
                &[(":public_key", &r.public_key)],
            ),
            OpPayload::Endorsement(e) => insert_with(
                conn,
                &format!(
                    "INSERT INTO endorsement_ops ({OP_COMMON_COLS}, endorsed_level, slots,
                        reward, deposit)
                     VALUES ({COMMON_NAMES}, :endorsed_level, :slots, :reward, :deposit)"
                ),
                op,
                &[
                    (":endorsed_level", &e.endorsed_level),
                    (":slots", &e.slots),
                    (":reward", &e.reward),
                    (":deposit", &e.deposit),
                ],
            ),
            OpPayload::Proposals(p) => insert_with(
                conn,
                &format!(
                    "INSERT INTO proposal_ops ({OP_COMMON_COLS}, period_index, proposal_id,
                        rolls, duplicated)
                     VALUES ({COMMON_NAMES}, :period_index, :proposal_id, :rolls, :duplicated)"
                ),
                op,
                &[
                    (":period_index", &p.period_index),
                    (":proposal_id", &p.proposal_id),
                    (":rolls", &p.rolls),
                    (":duplicated", &p.duplicated),
                ],
            ),
            OpPayload::Ballot(b) => {
                let vote = u8::from(b.vote) as i64;
                insert_with(
                    conn,
                    &format!(
                        "INSERT INTO ballot_ops ({OP_COMMON_COLS}, period_index, proposal_id,
                            vote, rolls)
                         VALUES ({COMMON_NAMES}, :period_index, :proposal_id, :vote, :rolls)"
                    ),
                    op,
                    &[
                        (":period_index", &b.period_index),
                        (":proposal_id", &b.proposal_id),
                        (":vote", &vote),
                        (":rolls", &b.rolls),
                    ],
                )
            }
            OpPayload::DoubleBaking(d) => insert_with(
                conn,
                &accusation_sql("double_baking_ops"),
                op,
                &[
                    (":accused_level", &d.accused_level),
                    (":offender_id", &d.offender_id),
                    (":accuser_id", &d.accuser_id),
                    (":lost_deposits", &d.offender_lost_deposits),
                    (":lost_rewards", &d.offender_lost_rewards),
                    (":lost_fees", &d.offender_lost_fees),
                    (":accuser_reward", &d.accuser_reward),
                ],
            ),
            OpPayload::DoubleEndorsing(d) => insert_with(
                conn,
                &accusation_sql("double_endorsing_ops"),
                op,
                &[
                    (":accused_level", &d.accused_level),
                    (":offender_id", &d.offender_id),
                    (":accuser_id", &d.accuser_id),
                    (":lost_deposits", &d.offender_lost_deposits),
                    (":lost_rewards", &d.offender_lost_rewards),
                    (":lost_fees", &d.offender_lost_fees),
                    (":accuser_reward", &d.accuser_reward),
                ],
            ),
            OpPayload::NonceRevelation(n) => insert_with(
                conn,
                &format!(
                    "INSERT INTO nonce_revelation_ops ({OP_COMMON_COLS}, baker_id,
                        revealed_level, reward)
                     VALUES ({COMMON_NAMES}, :baker_id, :revealed_level, :reward)"
                ),
                op,
                &[
                    (":baker_id", &n.baker_id),
                    (":revealed_level", &n.revealed_level),
                    (":reward", &n.reward),
                ],
            ),
            OpPayload::Activation(a) => insert_with(
                conn,
                &format!(
                    "INSERT INTO activation_ops ({OP_COMMON_COLS}, balance)
                     VALUES ({COMMON_NAMES}, :balance)"
                ),
                op,
                &[(":balance", &a.balance)],
            ),
            OpPayload::Migration(m) => {
                let kind = u8::from(m.kind) as i64;
                insert_with(
                    conn,
                    &format!(
                        "INSERT INTO migration_ops ({OP_COMMON_COLS}, kind, balance_change)
                         VALUES ({COMMON_NAMES}, :kind, :balance_change)"
                    ),
                    op,
                    &[(":kind", &kind), (":balance_change", &m.balance_change)],
                )
            }
            OpPayload::RegisterConstant(r) => insert_with(
                conn,
                &format!(
                    "INSERT INTO register_constant_ops ({OP_COMMON_COLS}, global_address,
                        expression, storage_used)
                     VALUES ({COMMON_NAMES}, :global_address, :expression, :storage_used)"
                ),
                op,
                &[
                    (":global_address", &r.global_address),
                    (":expression", &r.expression),
                    (":storage_used", &r.storage_used),
                ],
            ),
        }
    }

    fn accusation_sql(table: &str) -> String {
        format!(
            "INSERT INTO {table} ({OP_COMMON_COLS}, accused_level, offender_id, accuser_id,
                offender_lost_deposits, offender_lost_rewards, offender_lost_fees,
                accuser_reward)
             VALUES ({COMMON_NAMES}, :accused_level, :offender_id, :accuser_id,
                :lost_deposits, :lost_rewards, :lost_fees, :accuser_reward)"
        )
    }

    pub fn delete_operation(conn: &Connection, kind: OpKind, id: OpId) -> StoreResult<()> {
        conn.execute(
            &format!("DELETE FROM {} WHERE id = :id", op_table(kind)),
            named_params! { ":id": id },
        )?;
        Ok(())
    }

    fn load_ops(
        conn: &Connection,
        kind: OpKind,
        extra_cols: &str,
        level: Level,
        payload: impl Fn(&Row, OpCommon) -> rusqlite::Result<Operation>,
    ) -> StoreResult<Vec<Operation>> {
        let filter = Filter::new().eq("level", level)?;
        let (where_sql, params) = filter.render();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OP_COMMON_COLS}, {extra_cols} FROM {}{where_sql} ORDER BY id",
            op_table(kind)
        ))?;
        let bindings = Filter::bindings(&params);
        let rows = stmt.query_map(bindings.as_slice(), |row| {
            let common = op_common(row)?;
            payload(row, common)
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Every operation of a block in id order, reconstructed from all op tables
    pub fn operations_at_level(conn: &Connection, level: Level) -> StoreResult<Vec<Operation>> {
        let mut ops = Vec::new();

        ops.extend(load_ops(
            conn,
            OpKind::Transaction,
            "target_id, amount, entrypoint, parameters, allocated_target, internal_nonce",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::Transaction(TransactionOp {
                    target_id: row.get(12)?,
                    amount: row.get(13)?,
                    entrypoint: row.get(14)?,
                    parameters: row.get(15)?,
                    allocated_target: row.get(16)?,
                    internal_nonce: row.get(17)?,
                })))
            },
        )?);

        ops.extend(load_ops(
            conn,
            OpKind::Origination,
            "contract_id, delegate_id, balance, script, storage, internal_nonce",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::Origination(OriginationOp {
                    contract_id: row.get(12)?,
                    delegate_id: row.get(13)?,
                    balance: row.get(14)?,
                    script: row.get(15)?,
                    storage: row.get(16)?,
                    internal_nonce: row.get(17)?,
                })))
            },
        )?);

        ops.extend(load_ops(
            conn,
            OpKind::Delegation,
            "new_delegate_id, prev_delegate_id, registered_delegate, internal_nonce",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::Delegation(DelegationOp {
                    new_delegate_id: row.get(12)?,
                    prev_delegate_id: row.get(13)?,
                    registered_delegate: row.get(14)?,
                    internal_nonce: row.get(15)?,
                })))
            },
        )?);

        ops.extend(load_ops(conn, OpKind::Reveal, "public_key", level, |row, c| {
            Ok(into_operation(c, OpPayload::Reveal(RevealOp {
                public_key: row.get(12)?,
            })))
        })?);

        ops.extend(load_ops(
            conn,
            OpKind::Endorsement,
            "endorsed_level, slots, reward, deposit",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::Endorsement(EndorsementOp {
                    endorsed_level: row.get(12)?,
                    slots: row.get(13)?,
                    reward: row.get(14)?,
                    deposit: row.get(15)?,
                })))
            },
        )?);

        ops.extend(load_ops(
            conn,
            OpKind::Proposals,
            "period_index, proposal_id, rolls, duplicated",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::Proposals(ProposalsOp {
                    period_index: row.get(12)?,
                    proposal_id: row.get(13)?,
                    rolls: row.get(14)?,
                    duplicated: row.get(15)?,
                })))
            },
        )?);

        ops.extend(load_ops(
            conn,
            OpKind::Ballot,
            "period_index, proposal_id, vote, rolls",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::Ballot(BallotOp {
                    period_index: row.get(12)?,
                    proposal_id: row.get(13)?,
                    vote: tag(row, 14)?,
                    rolls: row.get(15)?,
                })))
            },
        )?);

        const ACCUSATION_COLS: &str = "accused_level, offender_id, accuser_id,
            offender_lost_deposits, offender_lost_rewards, offender_lost_fees, accuser_reward";

        ops.extend(load_ops(conn, OpKind::DoubleBaking, ACCUSATION_COLS, level, |row, c| {
            Ok(into_operation(c, OpPayload::DoubleBaking(DoubleBakingOp {
                accused_level: row.get(12)?,
                offender_id: row.get(13)?,
                accuser_id: row.get(14)?,
                offender_lost_deposits: row.get(15)?,
                offender_lost_rewards: row.get(16)?,
                offender_lost_fees: row.get(17)?,
                accuser_reward: row.get(18)?,
            })))
        })?);

        ops.extend(load_ops(conn, OpKind::DoubleEndorsing, ACCUSATION_COLS, level, |row, c| {
            Ok(into_operation(c, OpPayload::DoubleEndorsing(DoubleEndorsingOp {
                accused_level: row.get(12)?,
                offender_id: row.get(13)?,
                accuser_id: row.get(14)?,
                offender_lost_deposits: row.get(15)?,
                offender_lost_rewards: row.get(16)?,
                offender_lost_fees: row.get(17)?,
                accuser_reward: row.get(18)?,
            })))
        })?);

        ops.extend(load_ops(
            conn,
            OpKind::NonceRevelation,
            "baker_id, revealed_level, reward",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::NonceRevelation(NonceRevelationOp {
                    baker_id: row.get(12)?,
                    revealed_level: row.get(13)?,
                    reward: row.get(14)?,
                })))
            },
        )?);

        ops.extend(load_ops(conn, OpKind::Activation, "balance", level, |row, c| {
            Ok(into_operation(c, OpPayload::Activation(ActivationOp {
                balance: row.get(12)?,
            })))
        })?);

        ops.extend(load_ops(conn, OpKind::Migration, "kind, balance_change", level, |row, c| {
            let kind: MigrationKind = tag(row, 12)?;
            Ok(into_operation(c, OpPayload::Migration(MigrationOp {
                kind,
                balance_change: row.get(13)?,
            })))
        })?);

        ops.extend(load_ops(
            conn,
            OpKind::RegisterConstant,
            "global_address, expression, storage_used",
            level,
            |row, c| {
                Ok(into_operation(c, OpPayload::RegisterConstant(RegisterConstantOp {
                    global_address: row.get(12)?,
                    expression: row.get(13)?,
                    storage_used: row.get(14)?,
                })))
            },
        )?);

        ops.sort_by_key(|op| op.id);
        Ok(ops)
    }

    /// Whether the sender already upvoted this proposal in the period
    pub fn upvote_exists(
        conn: &Connection,
        period: PeriodIndex,
        sender: AccountId,
        proposal: i64,
    ) -> StoreResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proposal_ops
             WHERE period_index = :period AND sender_id = :sender
               AND proposal_id = :proposal AND duplicated = 0",
            named_params! { ":period": period, ":sender": sender, ":proposal": proposal },
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether the sender has an older proposals op in the period
    pub fn earlier_proposal_op_exists(
        conn: &Connection,
        period: PeriodIndex,
        sender: AccountId,
        before: OpId,
    ) -> StoreResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proposal_ops
             WHERE period_index = :period AND sender_id = :sender AND id < :before",
            named_params! { ":period": period, ":sender": sender, ":before": before },
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ---------------------------------------------------------------- cycles

    pub fn insert_cycle(conn: &Connection, cycle: &Cycle) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO cycles (idx, first_level, last_level, snapshot_index,
                snapshot_level, total_rolls, total_staking, selected_bakers, seed)
             VALUES (:idx, :first, :last, :snap_idx, :snap_level, :rolls, :staking,
                :bakers, :seed)",
            named_params! {
                ":idx": cycle.index,
                ":first": cycle.first_level,
                ":last": cycle.last_level,
                ":snap_idx": cycle.snapshot_index,
                ":snap_level": cycle.snapshot_level,
                ":rolls": cycle.total_rolls,
                ":staking": cycle.total_staking,
                ":bakers": cycle.selected_bakers,
                ":seed": cycle.seed,
            },
        )?;
        Ok(())
    }

    pub fn cycle_at(conn: &Connection, index: CycleIndex) -> StoreResult<Option<Cycle>> {
        conn.query_row(
            "SELECT idx, first_level, last_level, snapshot_index, snapshot_level,
                    total_rolls, total_staking, selected_bakers, seed
             FROM cycles WHERE idx = :idx",
            named_params! { ":idx": index },
            |row| {
                Ok(Cycle {
                    index: row.get(0)?,
                    first_level: row.get(1)?,
                    last_level: row.get(2)?,
                    snapshot_index: row.get(3)?,
                    snapshot_level: row.get(4)?,
                    total_rolls: row.get(5)?,
                    total_staking: row.get(6)?,
                    selected_bakers: row.get(7)?,
                    seed: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_cycle(conn: &Connection, index: CycleIndex) -> StoreResult<()> {
        conn.execute("DELETE FROM cycles WHERE idx = :idx", named_params! { ":idx": index })?;
        Ok(())
    }

    // ---------------------------------------------------------------- voting

    pub fn upsert_period(conn: &Connection, period: &VotingPeriod) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO voting_periods (idx, epoch, kind, first_level, last_level,
                status, top_upvotes, top_rolls, proposals_count, total_rolls,
                yay_rolls, nay_rolls, pass_rolls, ballot_quorum, participation_ema)
             VALUES (:idx, :epoch, :kind, :first, :last, :status, :top_upvotes, :top_rolls,
                :proposals_count, :total_rolls, :yay, :nay, :pass, :quorum, :ema)",
            named_params! {
                ":idx": period.index,
                ":epoch": period.epoch,
                ":kind": u8::from(period.kind) as i64,
                ":first": period.first_level,
                ":last": period.last_level,
                ":status": u8::from(period.status) as i64,
                ":top_upvotes": period.top_upvotes,
                ":top_rolls": period.top_rolls,
                ":proposals_count": period.proposals_count,
                ":total_rolls": period.total_rolls,
                ":yay": period.yay_rolls,
                ":nay": period.nay_rolls,
                ":pass": period.pass_rolls,
                ":quorum": period.ballot_quorum,
                ":ema": period.participation_ema,
            },
        )?;
        Ok(())
    }

    pub fn period_at(conn: &Connection, index: PeriodIndex) -> StoreResult<Option<VotingPeriod>> {
        conn.query_row(
            "SELECT idx, epoch, kind, first_level, last_level, status, top_upvotes, top_rolls,
                    proposals_count, total_rolls, yay_rolls, nay_rolls, pass_rolls,
                    ballot_quorum, participation_ema
             FROM voting_periods WHERE idx = :idx",
            named_params! { ":idx": index },
            |row| {
                Ok(VotingPeriod {
                    index: row.get(0)?,
                    epoch: row.get(1)?,
                    kind: tag(row, 2)?,
                    first_level: row.get(3)?,
                    last_level: row.get(4)?,
                    status: tag(row, 5)?,
                    top_upvotes: row.get(6)?,
                    top_rolls: row.get(7)?,
                    proposals_count: row.get(8)?,
                    total_rolls: row.get(9)?,
                    yay_rolls: row.get(10)?,
                    nay_rolls: row.get(11)?,
                    pass_rolls: row.get(12)?,
                    ballot_quorum: row.get(13)?,
                    participation_ema: row.get(14)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_period(conn: &Connection, index: PeriodIndex) -> StoreResult<()> {
        conn.execute("DELETE FROM voting_periods WHERE idx = :idx", named_params! { ":idx": index })?;
        Ok(())
    }

    pub fn upsert_proposal(conn: &Connection, proposal: &Proposal) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO proposals (id, hash, epoch, first_period, last_period,
                initiator_id, upvotes, rolls, status)
             VALUES (:id, :hash, :epoch, :first, :last, :initiator, :upvotes, :rolls, :status)",
            named_params! {
                ":id": proposal.id,
                ":hash": proposal.hash.as_str(),
                ":epoch": proposal.epoch,
                ":first": proposal.first_period,
                ":last": proposal.last_period,
                ":initiator": proposal.initiator_id,
                ":upvotes": proposal.upvotes,
                ":rolls": proposal.rolls,
                ":status": u8::from(proposal.status) as i64,
            },
        )?;
        Ok(())
    }

    fn proposal_from_row(row: &Row) -> rusqlite::Result<Proposal> {
        Ok(Proposal {
            id: row.get(0)?,
            hash: ProposalHash::new(row.get::<_, String>(1)?).map_err(conv(1))?,
            epoch: row.get(2)?,
            first_period: row.get(3)?,
            last_period: row.get(4)?,
            initiator_id: row.get(5)?,
            upvotes: row.get(6)?,
            rolls: row.get(7)?,
            status: tag(row, 8)?,
        })
    }

    const PROPOSAL_COLS: &str =
        "id, hash, epoch, first_period, last_period, initiator_id, upvotes, rolls, status";

    pub fn proposal_by_hash(
        conn: &Connection,
        hash: &ProposalHash,
        epoch: i32,
    ) -> StoreResult<Option<Proposal>> {
        conn.query_row(
            &format!("SELECT {PROPOSAL_COLS} FROM proposals WHERE hash = :hash AND epoch = :epoch"),
            named_params! { ":hash": hash.as_str(), ":epoch": epoch },
            proposal_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn proposals_of_epoch(conn: &Connection, epoch: i32) -> StoreResult<Vec<Proposal>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROPOSAL_COLS} FROM proposals WHERE epoch = :epoch ORDER BY id"
        ))?;
        let rows = stmt.query_map(named_params! { ":epoch": epoch }, proposal_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn delete_proposal(conn: &Connection, id: i64) -> StoreResult<()> {
        conn.execute("DELETE FROM proposals WHERE id = :id", named_params! { ":id": id })?;
        Ok(())
    }

    pub fn next_proposal_id(conn: &Connection) -> StoreResult<i64> {
        let max: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM proposals", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn insert_voting_snapshots(
        conn: &Connection,
        rows: &[VotingSnapshot],
    ) -> StoreResult<()> {
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO voting_snapshots (period_index, baker_id, rolls, status)
             VALUES (:period, :baker, :rolls, :status)",
        )?;
        for snapshot in rows {
            stmt.execute(named_params! {
                ":period": snapshot.period_index,
                ":baker": snapshot.baker_id,
                ":rolls": snapshot.rolls,
                ":status": u8::from(snapshot.status) as i64,
            })?;
        }
        Ok(())
    }

    pub fn delete_voting_snapshots(conn: &Connection, period: PeriodIndex) -> StoreResult<()> {
        conn.execute(
            "DELETE FROM voting_snapshots WHERE period_index = :period",
            named_params! { ":period": period },
        )?;
        Ok(())
    }

    pub fn voting_snapshot(
        conn: &Connection,
        period: PeriodIndex,
        baker: AccountId,
    ) -> StoreResult<Option<VotingSnapshot>> {
        conn.query_row(
            "SELECT period_index, baker_id, rolls, status FROM voting_snapshots
             WHERE period_index = :period AND baker_id = :baker",
            named_params! { ":period": period, ":baker": baker },
            |row| {
                Ok(VotingSnapshot {
                    period_index: row.get(0)?,
                    baker_id: row.get(1)?,
                    rolls: row.get(2)?,
                    status: tag(row, 3)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn set_snapshot_status(
        conn: &Connection,
        period: PeriodIndex,
        baker: AccountId,
        status: VoterStatus,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE voting_snapshots SET status = :status
             WHERE period_index = :period AND baker_id = :baker",
            named_params! {
                ":status": u8::from(status) as i64,
                ":period": period,
                ":baker": baker,
            },
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------- rights

    pub fn insert_baking_rights(conn: &Connection, rows: &[BakingRight]) -> StoreResult<()> {
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO baking_rights (cycle, level, baker_id, priority, status)
             VALUES (:cycle, :level, :baker, :priority, :status)",
        )?;
        for right in rows {
            stmt.execute(named_params! {
                ":cycle": right.cycle,
                ":level": right.level,
                ":baker": right.baker_id,
                ":priority": right.priority,
                ":status": u8::from(right.status) as i64,
            })?;
        }
        Ok(())
    }

    pub fn insert_endorsing_rights(conn: &Connection, rows: &[EndorsingRight]) -> StoreResult<()> {
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO endorsing_rights (cycle, level, baker_id, slots, status)
             VALUES (:cycle, :level, :baker, :slots, :status)",
        )?;
        for right in rows {
            stmt.execute(named_params! {
                ":cycle": right.cycle,
                ":level": right.level,
                ":baker": right.baker_id,
                ":slots": right.slots,
                ":status": u8::from(right.status) as i64,
            })?;
        }
        Ok(())
    }

    pub fn delete_rights_of_cycle(conn: &Connection, cycle: CycleIndex) -> StoreResult<()> {
        conn.execute("DELETE FROM baking_rights WHERE cycle = :c", named_params! { ":c": cycle })?;
        conn.execute("DELETE FROM endorsing_rights WHERE cycle = :c", named_params! { ":c": cycle })?;
        Ok(())
    }

    pub fn baking_rights_at(conn: &Connection, level: Level) -> StoreResult<Vec<BakingRight>> {
        let mut stmt = conn.prepare(
            "SELECT cycle, level, baker_id, priority, status FROM baking_rights
             WHERE level = :level ORDER BY priority",
        )?;
        let rows = stmt.query_map(named_params! { ":level": level }, |row| {
            Ok(BakingRight {
                cycle: row.get(0)?,
                level: row.get(1)?,
                baker_id: row.get(2)?,
                priority: row.get(3)?,
                status: tag(row, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn endorsing_rights_at(conn: &Connection, level: Level) -> StoreResult<Vec<EndorsingRight>> {
        let mut stmt = conn.prepare(
            "SELECT cycle, level, baker_id, slots, status FROM endorsing_rights
             WHERE level = :level ORDER BY baker_id",
        )?;
        let rows = stmt.query_map(named_params! { ":level": level }, |row| {
            Ok(EndorsingRight {
                cycle: row.get(0)?,
                level: row.get(1)?,
                baker_id: row.get(2)?,
                slots: row.get(3)?,
                status: tag(row, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_baking_right_status(
        conn: &Connection,
        level: Level,
        priority: i32,
        status: RightStatus,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE baking_rights SET status = :status
             WHERE level = :level AND priority = :priority",
            named_params! {
                ":status": u8::from(status) as i64,
                ":level": level,
                ":priority": priority,
            },
        )?;
        Ok(())
    }

    pub fn set_endorsing_right_status(
        conn: &Connection,
        level: Level,
        baker: AccountId,
        status: RightStatus,
    ) -> StoreResult<()> {
        conn.execute(
            "UPDATE endorsing_rights SET status = :status
             WHERE level = :level AND baker_id = :baker",
            named_params! {
                ":status": u8::from(status) as i64,
                ":level": level,
                ":baker": baker,
            },
        )?;
        Ok(())
    }

    /// Revert helper: everything at this level becomes future again
    pub fn reset_rights_at(conn: &Connection, level: Level) -> StoreResult<()> {
        conn.execute(
            "UPDATE baking_rights SET status = 0 WHERE level = :level",
            named_params! { ":level": level },
        )?;
        conn.execute(
            "UPDATE endorsing_rights SET status = 0 WHERE level = :level",
            named_params! { ":level": level },
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------- snapshots

    pub fn insert_delegate_snapshots(
        conn: &Connection,
        rows: &[DelegateSnapshot],
    ) -> StoreResult<()> {
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO delegate_snapshots
                (cycle, baker_id, rolls, staking_balance, delegators_count)
             VALUES (:cycle, :baker, :rolls, :staking, :delegators)",
        )?;
        for snapshot in rows {
            stmt.execute(named_params! {
                ":cycle": snapshot.cycle,
                ":baker": snapshot.baker_id,
                ":rolls": snapshot.rolls,
                ":staking": snapshot.staking_balance,
                ":delegators": snapshot.delegators_count,
            })?;
        }
        Ok(())
    }

    pub fn delete_delegate_snapshots(conn: &Connection, cycle: CycleIndex) -> StoreResult<()> {
        conn.execute(
            "DELETE FROM delegate_snapshots WHERE cycle = :cycle",
            named_params! { ":cycle": cycle },
        )?;
        Ok(())
    }

    pub fn delegate_snapshots_of(
        conn: &Connection,
        cycle: CycleIndex,
    ) -> StoreResult<Vec<DelegateSnapshot>> {
        let mut stmt = conn.prepare(
            "SELECT cycle, baker_id, rolls, staking_balance, delegators_count
             FROM delegate_snapshots WHERE cycle = :cycle ORDER BY baker_id",
        )?;
        let rows = stmt.query_map(named_params! { ":cycle": cycle }, |row| {
            Ok(DelegateSnapshot {
                cycle: row.get(0)?,
                baker_id: row.get(1)?,
                rolls: row.get(2)?,
                staking_balance: row.get(3)?,
                delegators_count: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ---------------------------------------------------------------- frozen

    pub fn upsert_frozen(conn: &Connection, row: &FrozenBalance) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO frozen_balances
                (cycle, baker_id, deposits, rewards, fees, unfrozen_at)
             VALUES (:cycle, :baker, :deposits, :rewards, :fees, :unfrozen_at)",
            named_params! {
                ":cycle": row.cycle,
                ":baker": row.baker_id,
                ":deposits": row.deposits,
                ":rewards": row.rewards,
                ":fees": row.fees,
                ":unfrozen_at": row.unfrozen_at,
            },
        )?;
        Ok(())
    }

    fn frozen_from_row(row: &Row) -> rusqlite::Result<FrozenBalance> {
        Ok(FrozenBalance {
            cycle: row.get(0)?,
            baker_id: row.get(1)?,
            deposits: row.get(2)?,
            rewards: row.get(3)?,
            fees: row.get(4)?,
            unfrozen_at: row.get(5)?,
        })
    }

    const FROZEN_COLS: &str = "cycle, baker_id, deposits, rewards, fees, unfrozen_at";

    pub fn frozen(
        conn: &Connection,
        cycle: CycleIndex,
        baker: AccountId,
    ) -> StoreResult<Option<FrozenBalance>> {
        conn.query_row(
            &format!(
                "SELECT {FROZEN_COLS} FROM frozen_balances
                 WHERE cycle = :cycle AND baker_id = :baker"
            ),
            named_params! { ":cycle": cycle, ":baker": baker },
            frozen_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn frozen_of_cycle(conn: &Connection, cycle: CycleIndex) -> StoreResult<Vec<FrozenBalance>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {FROZEN_COLS} FROM frozen_balances WHERE cycle = :cycle ORDER BY baker_id"
        ))?;
        let rows = stmt.query_map(named_params! { ":cycle": cycle }, frozen_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn frozen_unfrozen_at(conn: &Connection, level: Level) -> StoreResult<Vec<FrozenBalance>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {FROZEN_COLS} FROM frozen_balances WHERE unfrozen_at = :level ORDER BY baker_id"
        ))?;
        let rows = stmt.query_map(named_params! { ":level": level }, frozen_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn delete_frozen(conn: &Connection, cycle: CycleIndex, baker: AccountId) -> StoreResult<()> {
        conn.execute(
            "DELETE FROM frozen_balances WHERE cycle = :cycle AND baker_id = :baker",
            named_params! { ":cycle": cycle, ":baker": baker },
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------- nonces

    pub fn upsert_nonce(conn: &Connection, row: &NonceCommitment) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO nonce_commitments
                (level, cycle, baker_id, hash, revealed_at, penalty_rewards,
                 penalty_fees, penalized_at)
             VALUES (:level, :cycle, :baker, :hash, :revealed_at, :penalty_rewards,
                 :penalty_fees, :penalized_at)",
            named_params! {
                ":level": row.level,
                ":cycle": row.cycle,
                ":baker": row.baker_id,
                ":hash": row.hash,
                ":revealed_at": row.revealed_at,
                ":penalty_rewards": row.penalty_rewards,
                ":penalty_fees": row.penalty_fees,
                ":penalized_at": row.penalized_at,
            },
        )?;
        Ok(())
    }

    fn nonce_from_row(row: &Row) -> rusqlite::Result<NonceCommitment> {
        Ok(NonceCommitment {
            level: row.get(0)?,
            cycle: row.get(1)?,
            baker_id: row.get(2)?,
            hash: row.get(3)?,
            revealed_at: row.get(4)?,
            penalty_rewards: row.get(5)?,
            penalty_fees: row.get(6)?,
            penalized_at: row.get(7)?,
        })
    }

    const NONCE_COLS: &str =
        "level, cycle, baker_id, hash, revealed_at, penalty_rewards, penalty_fees, penalized_at";

    pub fn nonce_at(conn: &Connection, level: Level) -> StoreResult<Option<NonceCommitment>> {
        conn.query_row(
            &format!("SELECT {NONCE_COLS} FROM nonce_commitments WHERE level = :level"),
            named_params! { ":level": level },
            nonce_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_nonce(conn: &Connection, level: Level) -> StoreResult<()> {
        conn.execute(
            "DELETE FROM nonce_commitments WHERE level = :level",
            named_params! { ":level": level },
        )?;
        Ok(())
    }

    pub fn nonces_of_cycle(conn: &Connection, cycle: CycleIndex) -> StoreResult<Vec<NonceCommitment>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {NONCE_COLS} FROM nonce_commitments WHERE cycle = :cycle ORDER BY level"
        ))?;
        let rows = stmt.query_map(named_params! { ":cycle": cycle }, nonce_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn nonces_penalized_at(conn: &Connection, level: Level) -> StoreResult<Vec<NonceCommitment>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {NONCE_COLS} FROM nonce_commitments WHERE penalized_at = :level ORDER BY level"
        ))?;
        let rows = stmt.query_map(named_params! { ":level": level }, nonce_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // ---------------------------------------------------------------- quotes

    pub fn upsert_quote(conn: &Connection, quote: &Quote) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO quotes (level, btc, eur, usd, cny, jpy, krw, eth, gbp)
             VALUES (:level, :btc, :eur, :usd, :cny, :jpy, :krw, :eth, :gbp)",
            named_params! {
                ":level": quote.level,
                ":btc": quote.btc,
                ":eur": quote.eur,
                ":usd": quote.usd,
                ":cny": quote.cny,
                ":jpy": quote.jpy,
                ":krw": quote.krw,
                ":eth": quote.eth,
                ":gbp": quote.gbp,
            },
        )?;
        Ok(())
    }

    pub fn quote_at(conn: &Connection, level: Level) -> StoreResult<Option<Quote>> {
        conn.query_row(
            "SELECT level, btc, eur, usd, cny, jpy, krw, eth, gbp FROM quotes
             WHERE level = :level",
            named_params! { ":level": level },
            |row| {
                Ok(Quote {
                    level: row.get(0)?,
                    btc: row.get(1)?,
                    eur: row.get(2)?,
                    usd: row.get(3)?,
                    cny: row.get(4)?,
                    jpy: row.get(5)?,
                    krw: row.get(6)?,
                    eth: row.get(7)?,
                    gbp: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_quote(conn: &Connection, level: Level) -> StoreResult<()> {
        conn.execute("DELETE FROM quotes WHERE level = :level", named_params! { ":level": level })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(tail: char) -> Address {
        // Vary the last character within the base58 alphabet
        Address::new(format!("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZS{tail}")).unwrap()
    }

    #[test]
    fn app_state_round_trips() {
        let mut store = Store::in_memory().unwrap();
        assert!(store.app_state().unwrap().is_none());

        let state = AppState {
            level: 42,
            hash: Some(BlockHash::new("BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45gN").unwrap()),
            ..AppState::bootstrap(1)
        };
        let tx = store.begin().unwrap();
        tx.save_app_state(&state).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.app_state().unwrap(), Some(state));
    }

    #[test]
    fn dropping_tx_rolls_back() {
        let mut store = Store::in_memory().unwrap();
        {
            let tx = store.begin().unwrap();
            tx.save_app_state(&AppState::bootstrap(1)).unwrap();
            // no commit
        }
        assert!(store.app_state().unwrap().is_none());
    }

    #[test]
    fn account_round_trips_through_all_variants() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();

        let mut user = Account::new(1, address('a'), 10);
        user.balance = 500;
        user.counts.transactions = 3;
        tx.upsert_account(&user).unwrap();

        let mut delegate = Account::new(2, address('b'), 11);
        delegate.details = AccountDetails::Delegate(DelegateInfo {
            staking_balance: 9_000,
            delegators_count: 2,
            active_since: 11,
            deactivation_level: None,
            frozen_deposits: 640,
            frozen_rewards: 16,
            frozen_fees: 1,
            blocks_count: 7,
        });
        tx.upsert_account(&delegate).unwrap();

        let mut contract = Account::new(3, address('c'), 12);
        contract.details = AccountDetails::Contract(ContractInfo {
            kind: ContractKind::SmartContract,
            creator_id: 1,
            manager_id: Some(1),
            script: Some("{}".into()),
            storage: Some("0".into()),
            type_hash: 17,
            code_hash: 18,
        });
        tx.upsert_account(&contract).unwrap();

        for expected in [&user, &delegate, &contract] {
            let got = tx.account_by_id(expected.id).unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        assert_eq!(tx.account_id_by_address(user.address.as_str()).unwrap(), Some(1));
        assert_eq!(tx.delegates().unwrap().len(), 1);
    }

    #[test]
    fn operations_round_trip_in_id_order() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();

        let tx_op = Operation {
            id: 2,
            level: 101,
            cycle: 0,
            timestamp: 1_600_000_000,
            hash: Some(
                OpHash::new("ooPMQcQYa6HykEGJRVJPrG7iG5nnWBoobGsGYYUvMeGv8UhGPRT233").unwrap(),
            ),
            sender_id: 1,
            status: OpStatus::Applied,
            errors: None,
            baker_fee: 1000,
            storage_fee: 0,
            allocation_fee: 0,
            counter: Some(5),
            payload: OpPayload::Transaction(TransactionOp {
                target_id: Some(2),
                amount: 500_000,
                entrypoint: None,
                parameters: None,
                allocated_target: false,
                internal_nonce: None,
            }),
        };
        let reveal_op = Operation {
            id: 1,
            level: 101,
            cycle: 0,
            timestamp: 1_600_000_000,
            hash: None,
            sender_id: 1,
            status: OpStatus::Applied,
            errors: None,
            baker_fee: 300,
            storage_fee: 0,
            allocation_fee: 0,
            counter: Some(4),
            payload: OpPayload::Reveal(RevealOp {
                public_key: "edpk...".into(),
            }),
        };
        tx.insert_operation(&tx_op).unwrap();
        tx.insert_operation(&reveal_op).unwrap();

        let ops = tx.operations_at_level(101).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], reveal_op);
        assert_eq!(ops[1], tx_op);

        tx.delete_operation(OpKind::Transaction, 2).unwrap();
        assert_eq!(tx.operations_at_level(101).unwrap(), vec![reveal_op]);
    }

    #[test]
    fn frozen_balances_key_on_cycle_and_baker() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();

        let row = FrozenBalance {
            cycle: 7,
            baker_id: 2,
            deposits: 640,
            rewards: 16,
            fees: 1,
            unfrozen_at: None,
        };
        tx.upsert_frozen(&row).unwrap();
        assert_eq!(tx.frozen(7, 2).unwrap(), Some(row.clone()));
        assert_eq!(tx.frozen(7, 3).unwrap(), None);

        let unfrozen = FrozenBalance {
            unfrozen_at: Some(9000),
            ..row
        };
        tx.upsert_frozen(&unfrozen).unwrap();
        assert_eq!(tx.frozen_unfrozen_at(9000).unwrap(), vec![unfrozen]);
    }

    #[test]
    fn rights_statuses_reset_on_revert() {
        let mut store = Store::in_memory().unwrap();
        let tx = store.begin().unwrap();

        tx.insert_baking_rights(&[
            BakingRight { cycle: 1, level: 5000, baker_id: 2, priority: 0, status: RightStatus::Future },
            BakingRight { cycle: 1, level: 5000, baker_id: 3, priority: 1, status: RightStatus::Future },
        ])
        .unwrap();

        tx.set_baking_right_status(5000, 0, RightStatus::Missed).unwrap();
        tx.set_baking_right_status(5000, 1, RightStatus::Realized).unwrap();
        let rights = tx.baking_rights_at(5000).unwrap();
        assert_eq!(rights[0].status, RightStatus::Missed);
        assert_eq!(rights[1].status, RightStatus::Realized);

        tx.reset_rights_at(5000).unwrap();
        assert!(tx
            .baking_rights_at(5000)
            .unwrap()
            .iter()
            .all(|r| r.status == RightStatus::Future));
    }
}
