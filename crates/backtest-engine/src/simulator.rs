use statrs::statistics::Statistics;
use trading_core::Side;

use crate::models::{StrategyResult, Trade};

/// Auto-close thresholds simulated by default, percent on margin.
/// 0 replays history unchanged.
pub const DEFAULT_THRESHOLDS: [f64; 8] = [0.0, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 50.0];

const STARTING_EQUITY: f64 = 10_000.0;
const PROFIT_FACTOR_CAP: f64 = 999.0;

/// Replay the trade set under each auto-close threshold.
pub fn simulate(trades: &[Trade], thresholds: &[f64]) -> Vec<StrategyResult> {
    let mut sorted: Vec<f64> = thresholds.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    sorted
        .into_iter()
        .map(|p| simulate_threshold(trades, p))
        .collect()
}

/// The close price a threshold would have produced, plus the profit it gave
/// up. Auto-close models take-profit only: losses are never re-clipped.
fn simulated_close(trade: &Trade, threshold_pct: f64) -> (f64, f64, bool) {
    if threshold_pct == 0.0 || trade.leverage <= 0.0 {
        return (trade.close_price, 0.0, false);
    }

    let price_change_pct = threshold_pct / (100.0 * trade.leverage);
    match trade.side {
        Side::Long => {
            let auto_price = trade.open_price * (1.0 + price_change_pct);
            if trade.close_price > auto_price {
                let missed = trade.quantity * (trade.close_price - auto_price);
                (auto_price, missed, true)
            } else {
                (trade.close_price, 0.0, false)
            }
        }
        Side::Short => {
            let auto_price = trade.open_price * (1.0 - price_change_pct);
            if trade.close_price < auto_price {
                let missed = trade.quantity * (auto_price - trade.close_price);
                (auto_price, missed, true)
            } else {
                (trade.close_price, 0.0, false)
            }
        }
    }
}

fn simulate_threshold(trades: &[Trade], threshold_pct: f64) -> StrategyResult {
    let mut equity = STARTING_EQUITY;
    let mut peak_equity = STARTING_EQUITY;
    let mut max_drawdown_pct = 0.0f64;
    let mut returns: Vec<f64> = Vec::with_capacity(trades.len());

    let mut total_pnl = 0.0;
    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut neutrals = 0usize;
    let mut gross_wins = 0.0;
    let mut gross_losses = 0.0;
    let mut early_closes = 0usize;
    let mut missed_profit = 0.0;
    let mut hold_minutes = 0.0;

    for trade in trades {
        let (close_price, missed, early) = simulated_close(trade, threshold_pct);
        let pnl = match trade.side {
            Side::Long => trade.quantity * (close_price - trade.open_price),
            Side::Short => trade.quantity * (trade.open_price - close_price),
        };

        if early {
            early_closes += 1;
        }
        missed_profit += missed;
        total_pnl += pnl;
        hold_minutes += trade.hold_minutes();

        if pnl > 0.0 {
            wins += 1;
            gross_wins += pnl;
        } else if pnl < 0.0 {
            losses += 1;
            gross_losses += pnl.abs();
        } else {
            neutrals += 1;
        }

        let previous_equity = equity;
        equity += pnl;
        if previous_equity > 0.0 {
            returns.push((equity - previous_equity) / previous_equity);
        }
        if equity > peak_equity {
            peak_equity = equity;
        }
        if peak_equity > 0.0 {
            let drawdown = (peak_equity - equity) / peak_equity * 100.0;
            if drawdown > max_drawdown_pct {
                max_drawdown_pct = drawdown;
            }
        }
    }

    let total_trades = trades.len();
    let win_rate = if total_trades > 0 {
        wins as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };
    let avg_win = if wins > 0 { gross_wins / wins as f64 } else { 0.0 };
    let avg_loss = if losses > 0 {
        gross_losses / losses as f64
    } else {
        0.0
    };
    let profit_factor = if gross_losses > 0.0 {
        gross_wins / gross_losses
    } else if gross_wins > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };
    let avg_hold_minutes = if total_trades > 0 {
        hold_minutes / total_trades as f64
    } else {
        0.0
    };

    // The hourly annualization factor cancels between numerator and
    // denominator; it stays explicit to mirror the reported figure.
    let mean = returns.as_slice().mean();
    let std_dev = returns.as_slice().std_dev();
    let annualization = 24.0 * 365.0;
    let sharpe_ratio = if std_dev > 0.0 {
        (mean * annualization) / (std_dev * annualization)
    } else {
        0.0
    };

    StrategyResult {
        threshold_pct,
        total_pnl,
        total_trades,
        wins,
        losses,
        neutrals,
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        avg_hold_minutes,
        early_closes,
        missed_profit,
        max_drawdown_pct,
        sharpe_ratio,
    }
}
