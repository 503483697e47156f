use std::collections::HashMap;

use chrono::{DateTime, Utc};
use trading_core::{Decision, DecisionRecord, Side, TradeAction};

use crate::models::Trade;

struct OpenLot {
    open_price: f64,
    open_time: DateTime<Utc>,
    quantity: f64,
    leverage: f64,
    take_profit: Option<f64>,
    stop_loss: Option<f64>,
}

/// Fold journal records into completed trades.
///
/// Walks records in ascending cycle order and their actions in stored order.
/// Only successful actions participate. Re-opening a live `(symbol, side)`
/// drops the prior open; closes without a matching open are ignored; opens
/// still live at the end of the journal are discarded.
pub fn reconstruct_trades(records: &[DecisionRecord]) -> Vec<Trade> {
    let mut open: HashMap<(String, Side), OpenLot> = HashMap::new();
    let mut trades = Vec::new();

    for record in records {
        let decisions = parse_decisions(&record.decision_json);

        for action in &record.actions {
            if !action.success {
                continue;
            }
            let Some(side) = action.action.side() else {
                continue;
            };
            let key = (action.symbol.clone(), side);

            if action.action.is_open() {
                let decision = matching_decision(&decisions, &action.symbol, action.action);
                if open.contains_key(&key) {
                    tracing::debug!(
                        "overlapping open on {} {} at cycle {}: prior open dropped",
                        action.symbol,
                        side.as_str(),
                        record.cycle_number
                    );
                }
                open.insert(
                    key,
                    OpenLot {
                        open_price: action.price,
                        open_time: action.timestamp,
                        quantity: action.quantity,
                        leverage: action.leverage.unwrap_or(1.0),
                        take_profit: decision.and_then(|d| positive(d.take_profit)),
                        stop_loss: decision.and_then(|d| positive(d.stop_loss)),
                    },
                );
            } else if action.action.is_close() {
                let Some(lot) = open.remove(&key) else {
                    continue;
                };
                trades.push(finalize(key, lot, action.price, action.timestamp));
            }
        }
    }

    if !open.is_empty() {
        tracing::debug!("{} open position(s) at end of journal discarded", open.len());
    }
    trades
}

fn parse_decisions(decision_json: &str) -> Vec<Decision> {
    serde_json::from_str(decision_json).unwrap_or_default()
}

fn matching_decision<'a>(
    decisions: &'a [Decision],
    symbol: &str,
    action: TradeAction,
) -> Option<&'a Decision> {
    decisions
        .iter()
        .find(|d| d.symbol == symbol && d.action == action)
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

fn finalize(
    key: (String, Side),
    lot: OpenLot,
    close_price: f64,
    close_time: DateTime<Utc>,
) -> Trade {
    let (symbol, side) = key;
    let pnl = match side {
        Side::Long => lot.quantity * (close_price - lot.open_price),
        Side::Short => lot.quantity * (lot.open_price - close_price),
    };
    let margin_used = if lot.leverage > 0.0 {
        lot.quantity * lot.open_price / lot.leverage
    } else {
        0.0
    };
    let pnl_pct = if margin_used > 0.0 {
        pnl / margin_used * 100.0
    } else {
        0.0
    };

    Trade {
        symbol,
        side,
        open_price: lot.open_price,
        close_price,
        open_time: lot.open_time,
        close_time,
        quantity: lot.quantity,
        leverage: lot.leverage,
        take_profit: lot.take_profit,
        stop_loss: lot.stop_loss,
        pnl,
        pnl_pct,
    }
}
