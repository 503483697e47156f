use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use trading_core::DecisionRecord;

use crate::error::{is_transient, JournalError, JournalResult, WRITE_RETRY};
use crate::journal::{DecisionJournal, RestoredState};
use crate::row::{ActionRow, DecisionRow, PositionRow};

/// Embedded journal backend: a single SQLite file, synchronous=FULL so every
/// committed append reaches disk.
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    /// Open (or create) the journal database at `path`.
    pub async fn connect(path: &str) -> JournalResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Full);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let journal = Self { pool };
        journal.init_tables().await?;
        Ok(journal)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> JournalResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let journal = Self { pool };
        journal.init_tables().await?;
        Ok(journal)
    }

    async fn init_tables(&self) -> JournalResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trader_id TEXT NOT NULL,
                cycle_number INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                input_prompt TEXT NOT NULL,
                cot_trace TEXT NOT NULL,
                decision_json TEXT NOT NULL,
                raw_response TEXT,
                success INTEGER NOT NULL,
                error_message TEXT,
                account_total_balance REAL NOT NULL,
                account_available_balance REAL NOT NULL,
                account_unrealized_profit REAL NOT NULL,
                account_margin_used_pct REAL NOT NULL,
                candidate_coins TEXT NOT NULL,
                execution_log TEXT NOT NULL,
                UNIQUE (trader_id, cycle_number)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                decision_id INTEGER NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                entry_price REAL NOT NULL,
                mark_price REAL NOT NULL,
                unrealized_profit REAL NOT NULL,
                leverage REAL NOT NULL,
                liquidation_price REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decision_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                decision_id INTEGER NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                action TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                leverage REAL,
                price REAL NOT NULL,
                order_id TEXT,
                timestamp TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn try_append(&self, record: &DecisionRecord) -> Result<(), sqlx::Error> {
        let candidate_coins =
            serde_json::to_string(&record.candidate_coins).unwrap_or_else(|_| "[]".to_string());
        let execution_log =
            serde_json::to_string(&record.execution_log).unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await?;

        let (decision_id,): (i64,) = sqlx::query_as(
            "INSERT INTO decisions (
                trader_id, cycle_number, timestamp, input_prompt, cot_trace,
                decision_json, raw_response, success, error_message,
                account_total_balance, account_available_balance,
                account_unrealized_profit, account_margin_used_pct,
                candidate_coins, execution_log
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&record.trader_id)
        .bind(record.cycle_number)
        .bind(record.timestamp.to_rfc3339())
        .bind(&record.input_prompt)
        .bind(&record.cot_trace)
        .bind(&record.decision_json)
        .bind(&record.raw_response)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.account_total_balance)
        .bind(record.account_available_balance)
        .bind(record.account_unrealized_profit)
        .bind(record.account_margin_used_pct)
        .bind(&candidate_coins)
        .bind(&execution_log)
        .fetch_one(&mut *tx)
        .await?;

        for (seq, position) in record.positions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO positions (
                    decision_id, seq, symbol, side, quantity, entry_price,
                    mark_price, unrealized_profit, leverage, liquidation_price
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(decision_id)
            .bind(seq as i64)
            .bind(&position.symbol)
            .bind(position.side.as_str())
            .bind(position.quantity)
            .bind(position.entry_price)
            .bind(position.mark_price)
            .bind(position.unrealized_profit)
            .bind(position.leverage)
            .bind(position.liquidation_price)
            .execute(&mut *tx)
            .await?;
        }

        for (seq, action) in record.actions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO decision_actions (
                    decision_id, seq, action, symbol, quantity, leverage,
                    price, order_id, timestamp, success, error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(decision_id)
            .bind(seq as i64)
            .bind(action.action.as_str())
            .bind(&action.symbol)
            .bind(action.quantity)
            .bind(action.leverage)
            .bind(action.price)
            .bind(&action.order_id)
            .bind(action.timestamp.to_rfc3339())
            .bind(action.success)
            .bind(&action.error)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn hydrate(&self, row: DecisionRow) -> JournalResult<DecisionRecord> {
        let positions: Vec<PositionRow> = sqlx::query_as(
            "SELECT symbol, side, quantity, entry_price, mark_price,
                    unrealized_profit, leverage, liquidation_price
             FROM positions WHERE decision_id = ? ORDER BY seq",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let actions: Vec<ActionRow> = sqlx::query_as(
            "SELECT action, symbol, quantity, leverage, price, order_id,
                    timestamp, success, error
             FROM decision_actions WHERE decision_id = ? ORDER BY seq",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        row.into_record(positions, actions)
    }

    async fn hydrate_all(&self, rows: Vec<DecisionRow>) -> JournalResult<Vec<DecisionRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate(row).await?);
        }
        Ok(records)
    }
}

const SELECT_DECISION: &str = "SELECT id, trader_id, cycle_number, timestamp, input_prompt,
        cot_trace, decision_json, raw_response, success, error_message,
        account_total_balance, account_available_balance,
        account_unrealized_profit, account_margin_used_pct,
        candidate_coins, execution_log
 FROM decisions";

#[async_trait]
impl DecisionJournal for SqliteJournal {
    async fn append(&self, record: &DecisionRecord) -> JournalResult<()> {
        let mut attempt = 0;
        loop {
            match self.try_append(record).await {
                Ok(()) => return Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    return Err(JournalError::Conflict {
                        trader_id: record.trader_id.clone(),
                        cycle: record.cycle_number,
                    });
                }
                Err(e) if is_transient(&e) && attempt < WRITE_RETRY.len() => {
                    tracing::warn!(
                        "journal append retry {} for trader {} cycle {}: {}",
                        attempt + 1,
                        record.trader_id,
                        record.cycle_number,
                        e
                    );
                    tokio::time::sleep(WRITE_RETRY[attempt]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn latest(&self, trader_id: &str) -> JournalResult<Option<DecisionRecord>> {
        let row: Option<DecisionRow> = sqlx::query_as(&format!(
            "{SELECT_DECISION} WHERE trader_id = ? ORDER BY cycle_number DESC LIMIT 1"
        ))
        .bind(trader_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn range(
        &self,
        trader_id: &str,
        from: i64,
        to: i64,
    ) -> JournalResult<Vec<DecisionRecord>> {
        let rows: Vec<DecisionRow> = sqlx::query_as(&format!(
            "{SELECT_DECISION} WHERE trader_id = ? AND cycle_number BETWEEN ? AND ?
             ORDER BY cycle_number"
        ))
        .bind(trader_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_all(rows).await
    }

    async fn all(&self, trader_id: &str) -> JournalResult<Vec<DecisionRecord>> {
        let rows: Vec<DecisionRow> = sqlx::query_as(&format!(
            "{SELECT_DECISION} WHERE trader_id = ? ORDER BY cycle_number"
        ))
        .bind(trader_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_all(rows).await
    }

    async fn seed(&self, trader_id: &str, initial_balance: f64) -> JournalResult<()> {
        let seed = DecisionRecord::seed(trader_id, initial_balance, Utc::now());
        match self.append(&seed).await {
            Ok(()) => Ok(()),
            Err(JournalError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn restore_state(&self, trader_id: &str) -> JournalResult<RestoredState> {
        let seed = self
            .range(trader_id, 0, 0)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JournalError::MissingSeed(trader_id.to_string()))?;
        let latest = self
            .latest(trader_id)
            .await?
            .ok_or_else(|| JournalError::MissingSeed(trader_id.to_string()))?;

        Ok(RestoredState {
            initial_balance: seed.account_total_balance,
            last_account: latest.account_snapshot(),
            next_cycle: latest.cycle_number + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use trading_core::{ActionRecord, Position, Side, TradeAction};

    use super::*;

    fn record(trader: &str, cycle: i64, balance: f64) -> DecisionRecord {
        DecisionRecord {
            trader_id: trader.to_string(),
            cycle_number: cycle,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            input_prompt: "prompt".to_string(),
            cot_trace: "thinking".to_string(),
            decision_json: "[]".to_string(),
            raw_response: Some("raw".to_string()),
            success: true,
            error_message: None,
            account_total_balance: balance,
            account_available_balance: balance,
            account_unrealized_profit: 0.0,
            account_margin_used_pct: 0.0,
            positions: Vec::new(),
            actions: Vec::new(),
            candidate_coins: vec!["BTCUSDT".to_string()],
            execution_log: Vec::new(),
        }
    }

    #[tokio::test]
    async fn append_then_conflict_on_same_cycle() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        journal.append(&record("t1", 1, 10000.0)).await.unwrap();

        let err = journal.append(&record("t1", 1, 9000.0)).await.unwrap_err();
        assert!(err.is_conflict());

        // Same cycle for a different trader is fine.
        journal.append(&record("t2", 1, 10000.0)).await.unwrap();
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        journal.seed("t1", 10000.0).await.unwrap();
        journal.seed("t1", 99999.0).await.unwrap();

        let seed = journal.range("t1", 0, 0).await.unwrap().remove(0);
        assert_eq!(seed.cycle_number, 0);
        assert_eq!(seed.account_total_balance, 10000.0);
        assert!(seed.positions.is_empty());
        assert!(seed.actions.is_empty());
        assert_eq!(seed.decision_json, "{\"seed\":true}");
    }

    #[tokio::test]
    async fn range_and_all_return_ascending_cycles() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        journal.seed("t1", 10000.0).await.unwrap();
        for cycle in [3, 1, 2] {
            journal.append(&record("t1", cycle, 10000.0)).await.unwrap();
        }

        let all = journal.all("t1").await.unwrap();
        let cycles: Vec<i64> = all.iter().map(|r| r.cycle_number).collect();
        assert_eq!(cycles, vec![0, 1, 2, 3]);

        let mid = journal.range("t1", 1, 2).await.unwrap();
        let cycles: Vec<i64> = mid.iter().map(|r| r.cycle_number).collect();
        assert_eq!(cycles, vec![1, 2]);
    }

    #[tokio::test]
    async fn restore_state_reads_seed_and_latest() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        journal.seed("t1", 10000.0).await.unwrap();
        journal.append(&record("t1", 1, 10100.0)).await.unwrap();
        journal.append(&record("t1", 2, 10250.0)).await.unwrap();

        let restored = journal.restore_state("t1").await.unwrap();
        assert_eq!(restored.initial_balance, 10000.0);
        assert_eq!(restored.last_account.total_balance, 10250.0);
        assert_eq!(restored.next_cycle, 3);
    }

    #[tokio::test]
    async fn restore_state_without_seed_fails() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        let err = journal.restore_state("ghost").await.unwrap_err();
        assert!(matches!(err, JournalError::MissingSeed(_)));
    }

    #[tokio::test]
    async fn positions_and_actions_round_trip_in_order() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        let mut rec = record("t1", 1, 10000.0);
        rec.positions = vec![
            Position {
                symbol: "BTCUSDT".to_string(),
                side: Side::Long,
                quantity: 0.1,
                entry_price: 20000.0,
                mark_price: 20500.0,
                unrealized_profit: 50.0,
                leverage: 5.0,
                liquidation_price: 16000.0,
            },
            Position {
                symbol: "ETHUSDT".to_string(),
                side: Side::Short,
                quantity: 1.0,
                entry_price: 3000.0,
                mark_price: 2950.0,
                unrealized_profit: 50.0,
                leverage: 3.0,
                liquidation_price: 4000.0,
            },
        ];
        rec.actions = vec![
            ActionRecord {
                action: TradeAction::OpenLong,
                symbol: "BTCUSDT".to_string(),
                quantity: 0.1,
                leverage: Some(5.0),
                price: 20000.0,
                order_id: Some("ord-1".to_string()),
                timestamp: rec.timestamp,
                success: true,
                error: None,
            },
            ActionRecord {
                action: TradeAction::CloseShort,
                symbol: "ETHUSDT".to_string(),
                quantity: 1.0,
                leverage: None,
                price: 2950.0,
                order_id: None,
                timestamp: rec.timestamp,
                success: false,
                error: Some("insufficient position".to_string()),
            },
        ];
        journal.append(&rec).await.unwrap();

        let loaded = journal.latest("t1").await.unwrap().unwrap();
        assert_eq!(loaded.positions.len(), 2);
        assert_eq!(loaded.positions[0].symbol, "BTCUSDT");
        assert_eq!(loaded.positions[1].side, Side::Short);
        assert_eq!(loaded.actions.len(), 2);
        assert_eq!(loaded.actions[0].action, TradeAction::OpenLong);
        assert_eq!(loaded.actions[0].order_id.as_deref(), Some("ord-1"));
        assert!(!loaded.actions[1].success);
        assert_eq!(loaded.candidate_coins, vec!["BTCUSDT".to_string()]);
    }
}
