use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use trading_core::{
    AccountSnapshot, MarketSnapshotProvider, OrderFill, Position, PositionStore, Side,
};

struct PaperState {
    /// Cash collateral including margin currently locked by open positions.
    balance: f64,
    positions: HashMap<(String, Side), Position>,
}

/// Simulated position store: fills at the current mark price, one position
/// per `(symbol, side)`.
pub struct PaperPositionStore {
    market: Arc<dyn MarketSnapshotProvider>,
    state: Mutex<PaperState>,
}

impl PaperPositionStore {
    pub fn new(market: Arc<dyn MarketSnapshotProvider>, initial_balance: f64) -> Self {
        Self {
            market,
            state: Mutex::new(PaperState {
                balance: initial_balance,
                positions: HashMap::new(),
            }),
        }
    }

    async fn mark_prices(&self, symbols: Vec<String>) -> HashMap<String, f64> {
        if symbols.is_empty() {
            return HashMap::new();
        }
        match self.market.market_data(&symbols).await {
            Ok(data) => data.into_iter().map(|(s, m)| (s, m.price)).collect(),
            Err(e) => {
                tracing::warn!("paper store: mark price refresh failed: {}", e);
                HashMap::new()
            }
        }
    }

    /// Update mark prices and unrealized P&L on every held position.
    async fn refresh(&self, state: &mut PaperState) {
        let symbols: Vec<String> = state
            .positions
            .keys()
            .map(|(symbol, _)| symbol.clone())
            .collect();
        let marks = self.mark_prices(symbols).await;
        for ((symbol, side), position) in state.positions.iter_mut() {
            if let Some(&mark) = marks.get(symbol) {
                position.mark_price = mark;
                position.unrealized_profit = match side {
                    Side::Long => position.quantity * (mark - position.entry_price),
                    Side::Short => position.quantity * (position.entry_price - mark),
                };
            }
        }
    }

    fn snapshot(state: &PaperState) -> AccountSnapshot {
        let margin_used: f64 = state.positions.values().map(Position::margin_used).sum();
        let unrealized: f64 = state
            .positions
            .values()
            .map(|p| p.unrealized_profit)
            .sum();
        let total = state.balance + unrealized;
        AccountSnapshot {
            total_balance: total,
            available_balance: state.balance - margin_used,
            unrealized_profit: unrealized,
            position_count: state.positions.len(),
            margin_used_pct: if total > 0.0 {
                margin_used / total * 100.0
            } else {
                0.0
            },
        }
    }
}

#[async_trait]
impl PositionStore for PaperPositionStore {
    async fn account(&self) -> Result<AccountSnapshot> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        Ok(Self::snapshot(&state))
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn open(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        leverage: f64,
    ) -> Result<OrderFill> {
        if quantity <= 0.0 {
            return Err(anyhow!("cannot open {symbol}: quantity must be positive"));
        }
        let leverage = if leverage > 0.0 { leverage } else { 1.0 };

        let marks = self.mark_prices(vec![symbol.to_string()]).await;
        let price = *marks
            .get(symbol)
            .ok_or_else(|| anyhow!("cannot open {symbol}: no mark price"))?;

        let mut state = self.state.lock().await;
        let key = (symbol.to_string(), side);
        if state.positions.contains_key(&key) {
            return Err(anyhow!(
                "cannot open {symbol} {}: position already exists",
                side.as_str()
            ));
        }

        let margin = quantity * price / leverage;
        let margin_used: f64 = state.positions.values().map(Position::margin_used).sum();
        if margin > state.balance - margin_used {
            return Err(anyhow!(
                "cannot open {symbol}: margin {margin:.2} exceeds free balance"
            ));
        }

        let liquidation_price = match side {
            Side::Long => price * (1.0 - 1.0 / leverage),
            Side::Short => price * (1.0 + 1.0 / leverage),
        };
        state.positions.insert(
            key,
            Position {
                symbol: symbol.to_string(),
                side,
                quantity,
                entry_price: price,
                mark_price: price,
                unrealized_profit: 0.0,
                leverage,
                liquidation_price,
            },
        );

        Ok(OrderFill {
            order_id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            price,
            quantity,
            timestamp: Utc::now(),
        })
    }

    async fn close(&self, symbol: &str, side: Side) -> Result<OrderFill> {
        let marks = self.mark_prices(vec![symbol.to_string()]).await;

        let mut state = self.state.lock().await;
        let key = (symbol.to_string(), side);
        let position = state
            .positions
            .remove(&key)
            .ok_or_else(|| anyhow!("cannot close {symbol} {}: no position", side.as_str()))?;

        let price = marks.get(symbol).copied().unwrap_or(position.mark_price);
        let pnl = match side {
            Side::Long => position.quantity * (price - position.entry_price),
            Side::Short => position.quantity * (position.entry_price - price),
        };
        state.balance += pnl;

        Ok(OrderFill {
            order_id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            price,
            quantity: position.quantity,
            timestamp: Utc::now(),
        })
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn store_name(&self) -> &str {
        "paper"
    }
}
