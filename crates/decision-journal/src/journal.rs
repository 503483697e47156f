use async_trait::async_trait;
use trading_core::{AccountSnapshot, DecisionRecord};

use crate::error::JournalResult;

/// State recovered from the journal on boot.
#[derive(Debug, Clone)]
pub struct RestoredState {
    pub initial_balance: f64,
    pub last_account: AccountSnapshot,
    /// The cycle number the next live cycle should use (latest + 1).
    pub next_cycle: i64,
}

/// Append-mostly per-trader decision log, keyed by `(trader_id, cycle_number)`.
///
/// Implemented by the embedded SQLite store and the network PostgreSQL
/// store; consumers depend only on this trait.
#[async_trait]
pub trait DecisionJournal: Send + Sync {
    /// Append one cycle record. Fails with [`crate::JournalError::Conflict`]
    /// when `(trader_id, cycle_number)` already exists. The write is
    /// transactional across the record, its positions, and its actions.
    async fn append(&self, record: &DecisionRecord) -> JournalResult<()>;

    /// The record with the highest cycle number, seed included.
    async fn latest(&self, trader_id: &str) -> JournalResult<Option<DecisionRecord>>;

    /// Records with `from <= cycle_number <= to`, ascending.
    async fn range(&self, trader_id: &str, from: i64, to: i64)
        -> JournalResult<Vec<DecisionRecord>>;

    /// Full history, ascending by cycle number.
    async fn all(&self, trader_id: &str) -> JournalResult<Vec<DecisionRecord>>;

    /// Insert the cycle-0 seed if absent. Idempotent.
    async fn seed(&self, trader_id: &str, initial_balance: f64) -> JournalResult<()>;

    /// Recover initial balance, last account snapshot, and the next cycle
    /// number from the seed and latest records.
    async fn restore_state(&self, trader_id: &str) -> JournalResult<RestoredState>;
}
