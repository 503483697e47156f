use chrono::{DateTime, Utc};
use trading_core::{ActionRecord, DecisionRecord, Position, Side, TradeAction};

use crate::error::{JournalError, JournalResult};

/// Flat `decisions` row, shared by both backends.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DecisionRow {
    pub id: i64,
    pub trader_id: String,
    pub cycle_number: i64,
    pub timestamp: String,
    pub input_prompt: String,
    pub cot_trace: String,
    pub decision_json: String,
    pub raw_response: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub account_total_balance: f64,
    pub account_available_balance: f64,
    pub account_unrealized_profit: f64,
    pub account_margin_used_pct: f64,
    pub candidate_coins: String,
    pub execution_log: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PositionRow {
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_profit: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ActionRow {
    pub action: String,
    pub symbol: String,
    pub quantity: f64,
    pub leverage: Option<f64>,
    pub price: f64,
    pub order_id: Option<String>,
    pub timestamp: String,
    pub success: bool,
    pub error: Option<String>,
}

pub(crate) fn parse_timestamp(raw: &str) -> JournalResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| JournalError::Corrupt(format!("timestamp {raw:?}")))
}

impl PositionRow {
    pub(crate) fn into_position(self) -> JournalResult<Position> {
        let side = Side::parse(&self.side)
            .ok_or_else(|| JournalError::Corrupt(format!("position side {:?}", self.side)))?;
        Ok(Position {
            symbol: self.symbol,
            side,
            quantity: self.quantity,
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            unrealized_profit: self.unrealized_profit,
            leverage: self.leverage,
            liquidation_price: self.liquidation_price,
        })
    }
}

impl ActionRow {
    pub(crate) fn into_action(self) -> JournalResult<ActionRecord> {
        let action = TradeAction::parse(&self.action)
            .ok_or_else(|| JournalError::Corrupt(format!("action kind {:?}", self.action)))?;
        let timestamp = parse_timestamp(&self.timestamp)?;
        Ok(ActionRecord {
            action,
            symbol: self.symbol,
            quantity: self.quantity,
            leverage: self.leverage,
            price: self.price,
            order_id: self.order_id,
            timestamp,
            success: self.success,
            error: self.error,
        })
    }
}

impl DecisionRow {
    pub(crate) fn into_record(
        self,
        positions: Vec<PositionRow>,
        actions: Vec<ActionRow>,
    ) -> JournalResult<DecisionRecord> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        let candidate_coins: Vec<String> = serde_json::from_str(&self.candidate_coins)?;
        let execution_log: Vec<String> = serde_json::from_str(&self.execution_log)?;
        Ok(DecisionRecord {
            trader_id: self.trader_id,
            cycle_number: self.cycle_number,
            timestamp,
            input_prompt: self.input_prompt,
            cot_trace: self.cot_trace,
            decision_json: self.decision_json,
            raw_response: self.raw_response,
            success: self.success,
            error_message: self.error_message,
            account_total_balance: self.account_total_balance,
            account_available_balance: self.account_available_balance,
            account_unrealized_profit: self.account_unrealized_profit,
            account_margin_used_pct: self.account_margin_used_pct,
            positions: positions
                .into_iter()
                .map(PositionRow::into_position)
                .collect::<JournalResult<_>>()?,
            actions: actions
                .into_iter()
                .map(ActionRow::into_action)
                .collect::<JournalResult<_>>()?,
            candidate_coins,
            execution_log,
        })
    }
}
