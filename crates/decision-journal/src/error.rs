use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("cycle {cycle} already recorded for trader {trader_id}")]
    Conflict { trader_id: String, cycle: i64 },

    #[error("trader {0} has no seed record")]
    MissingSeed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

impl JournalError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, JournalError::Conflict { .. })
    }
}

pub type JournalResult<T> = Result<T, JournalError>;

/// Inner retry schedule for transient backend failures.
pub(crate) const WRITE_RETRY: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_millis(500),
    Duration::from_millis(1000),
];

/// Whether an append may succeed on retry (lock contention, broken
/// connection). Unique-key violations and logic errors are not retried.
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.contains("database is locked")
                || msg.contains("database table is locked")
                || msg.contains("connection")
        }
        _ => false,
    }
}
