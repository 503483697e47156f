use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_core::Side;

/// A completed open/close pair reconstructed from the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub open_price: f64,
    pub close_price: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub quantity: f64,
    pub leverage: f64,
    /// Take-profit from the opening decision, when present.
    pub take_profit: Option<f64>,
    /// Stop-loss from the opening decision, when present. Parsed for
    /// completeness; the auto-close simulation does not use it.
    pub stop_loss: Option<f64>,
    pub pnl: f64,
    /// P&L relative to the margin used, in percent. 0 when no margin.
    pub pnl_pct: f64,
}

impl Trade {
    pub fn margin_used(&self) -> f64 {
        if self.leverage > 0.0 {
            self.quantity * self.open_price / self.leverage
        } else {
            0.0
        }
    }

    pub fn hold_minutes(&self) -> f64 {
        (self.close_time - self.open_time).num_seconds() as f64 / 60.0
    }
}

/// Performance of one hypothetical auto-close threshold over the trade set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyResult {
    /// Auto-close threshold as percent on margin. 0 = no auto-close.
    pub threshold_pct: f64,
    pub total_pnl: f64,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub neutrals: usize,
    /// Percent of trades with positive simulated P&L.
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub avg_hold_minutes: f64,
    /// Trades the auto-close would have cut short.
    pub early_closes: usize,
    /// Profit given up by closing early, summed across trades.
    pub missed_profit: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
}

/// One backtest run over a trader's journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trader_id: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub total_cycles: i64,
    pub total_trades: usize,
    pub results: Vec<StrategyResult>,
    pub best_by_sharpe: f64,
    pub best_by_pnl: f64,
    pub best_by_win_rate: f64,
}
