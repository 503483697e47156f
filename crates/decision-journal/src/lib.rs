pub mod error;
pub mod journal;
pub mod postgres;
mod row;
pub mod sqlite;

pub use error::{JournalError, JournalResult};
pub use journal::{DecisionJournal, RestoredState};
pub use postgres::PostgresJournal;
pub use sqlite::SqliteJournal;
