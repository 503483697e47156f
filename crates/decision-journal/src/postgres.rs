use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use trading_core::DecisionRecord;

use crate::error::{is_transient, JournalError, JournalResult, WRITE_RETRY};
use crate::journal::{DecisionJournal, RestoredState};
use crate::row::{ActionRow, DecisionRow, PositionRow};

/// Network journal backend on PostgreSQL. Same logical schema as the
/// embedded store; the unique key serializes writes per trader while
/// admitting concurrent writes across traders.
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    pub async fn connect(database_url: &str) -> JournalResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let journal = Self { pool };
        journal.init_tables().await?;
        Ok(journal)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn init_tables(&self) -> JournalResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decisions (
                id BIGSERIAL PRIMARY KEY,
                trader_id TEXT NOT NULL,
                cycle_number BIGINT NOT NULL,
                timestamp TEXT NOT NULL,
                input_prompt TEXT NOT NULL,
                cot_trace TEXT NOT NULL,
                decision_json TEXT NOT NULL,
                raw_response TEXT,
                success BOOLEAN NOT NULL,
                error_message TEXT,
                account_total_balance DOUBLE PRECISION NOT NULL,
                account_available_balance DOUBLE PRECISION NOT NULL,
                account_unrealized_profit DOUBLE PRECISION NOT NULL,
                account_margin_used_pct DOUBLE PRECISION NOT NULL,
                candidate_coins TEXT NOT NULL,
                execution_log TEXT NOT NULL,
                UNIQUE (trader_id, cycle_number)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                id BIGSERIAL PRIMARY KEY,
                decision_id BIGINT NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
                seq BIGINT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity DOUBLE PRECISION NOT NULL,
                entry_price DOUBLE PRECISION NOT NULL,
                mark_price DOUBLE PRECISION NOT NULL,
                unrealized_profit DOUBLE PRECISION NOT NULL,
                leverage DOUBLE PRECISION NOT NULL,
                liquidation_price DOUBLE PRECISION NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decision_actions (
                id BIGSERIAL PRIMARY KEY,
                decision_id BIGINT NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
                seq BIGINT NOT NULL,
                action TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity DOUBLE PRECISION NOT NULL,
                leverage DOUBLE PRECISION,
                price DOUBLE PRECISION NOT NULL,
                order_id TEXT,
                timestamp TEXT NOT NULL,
                success BOOLEAN NOT NULL,
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
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
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
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
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
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
             FROM positions WHERE decision_id = $1 ORDER BY seq",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let actions: Vec<ActionRow> = sqlx::query_as(
            "SELECT action, symbol, quantity, leverage, price, order_id,
                    timestamp, success, error
             FROM decision_actions WHERE decision_id = $1 ORDER BY seq",
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
impl DecisionJournal for PostgresJournal {
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
            "{SELECT_DECISION} WHERE trader_id = $1 ORDER BY cycle_number DESC LIMIT 1"
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
            "{SELECT_DECISION} WHERE trader_id = $1 AND cycle_number BETWEEN $2 AND $3
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
            "{SELECT_DECISION} WHERE trader_id = $1 ORDER BY cycle_number"
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
