use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use chrono::Utc;
use trading_core::DecisionRecord;

use crate::models::{BacktestReport, StrategyResult};

/// Threshold whose `metric` is highest; ties go to the lowest threshold.
fn best_threshold(results: &[StrategyResult], metric: impl Fn(&StrategyResult) -> f64) -> f64 {
    let mut best: Option<(f64, f64)> = None;
    for result in results {
        let value = metric(result);
        let better = match best {
            Some((_, best_value)) => value > best_value,
            None => true,
        };
        if better {
            best = Some((result.threshold_pct, value));
        }
    }
    best.map(|(threshold, _)| threshold).unwrap_or(0.0)
}

/// Assemble the report header around per-threshold results.
///
/// `results` must be in ascending threshold order (as [`crate::simulate`]
/// returns them) so the lowest threshold wins ties.
pub fn build_report(
    trader_id: &str,
    records: &[DecisionRecord],
    total_trades: usize,
    results: Vec<StrategyResult>,
) -> BacktestReport {
    let period_start = records.first().map(|r| r.timestamp);
    let period_end = records.last().map(|r| r.timestamp);
    let total_cycles = records.last().map(|r| r.cycle_number).unwrap_or(0);

    let best_by_sharpe = best_threshold(&results, |r| r.sharpe_ratio);
    let best_by_pnl = best_threshold(&results, |r| r.total_pnl);
    let best_by_win_rate = best_threshold(&results, |r| r.win_rate);

    BacktestReport {
        trader_id: trader_id.to_string(),
        generated_at: Utc::now(),
        period_start,
        period_end,
        total_cycles,
        total_trades,
        results,
        best_by_sharpe,
        best_by_pnl,
        best_by_win_rate,
    }
}

/// Write `<dir>/<trader_id>/backtest_<yyyyMMdd_HHmmss>.json`.
pub fn write_report(dir: &Path, report: &BacktestReport) -> Result<PathBuf> {
    let trader_dir = dir.join(&report.trader_id);
    fs::create_dir_all(&trader_dir)
        .with_context(|| format!("creating {}", trader_dir.display()))?;

    let filename = format!(
        "backtest_{}.json",
        report.generated_at.format("%Y%m%d_%H%M%S")
    );
    let path = trader_dir.join(filename);
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// The most recent `backtest_*.json` under `<dir>/<trader_id>`, by filename.
pub fn latest_report(dir: &Path, trader_id: &str) -> Result<Option<BacktestReport>> {
    let trader_dir = dir.join(trader_id);
    if !trader_dir.is_dir() {
        return Ok(None);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(&trader_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("backtest_") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    let Some(path) = candidates.pop() else {
        return Ok(None);
    };
    let json = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Plain-text comparison table across traders' most recent reports.
pub fn summarize_table(reports: &[(String, Option<BacktestReport>)]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>8} {:>8} {:>12} {:>9} {:>8} {:>10} {:>10}",
        "trader", "cycles", "trades", "pnl(p=0)", "winrate", "sharpe", "best_pnl", "best_shrp"
    );

    for (trader_id, report) in reports {
        match report {
            Some(report) => {
                let baseline = report
                    .results
                    .iter()
                    .find(|r| r.threshold_pct == 0.0);
                let (pnl, win_rate, sharpe) = baseline
                    .map(|r| (r.total_pnl, r.win_rate, r.sharpe_ratio))
                    .unwrap_or((0.0, 0.0, 0.0));
                let _ = writeln!(
                    out,
                    "{:<16} {:>8} {:>8} {:>12.2} {:>8.1}% {:>8.3} {:>9.0}% {:>9.0}%",
                    trader_id,
                    report.total_cycles,
                    report.total_trades,
                    pnl,
                    win_rate,
                    sharpe,
                    report.best_by_pnl,
                    report.best_by_sharpe,
                );
            }
            None => {
                let _ = writeln!(out, "{:<16} (no backtest found)", trader_id);
            }
        }
    }
    out
}
