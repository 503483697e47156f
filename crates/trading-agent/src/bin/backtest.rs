use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use backtest_engine::{
    build_report, latest_report, reconstruct_trades, simulate, summarize_table, write_report,
    DEFAULT_THRESHOLDS,
};
use clap::{Parser, Subcommand};
use decision_journal::{DecisionJournal, SqliteJournal};
use trading_agent::config::AppConfig;

/// Replay a trader's decision journal under hypothetical auto-close
/// thresholds, or compare traders' most recent backtests.
#[derive(Parser)]
#[command(name = "backtest")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Backtest one trader's journal and write a JSON report.
    Run {
        /// Trader id to backtest.
        #[arg(long)]
        trader: String,
        /// Decision log directory holding decisions.db.
        #[arg(long)]
        dir: PathBuf,
        /// Comma-separated auto-close thresholds (percent on margin).
        /// 0 is always included.
        #[arg(long)]
        thresholds: Option<String>,
    },
    /// Print a comparison table over each trader's most recent report.
    Summarize {
        /// Decision log directory.
        #[arg(long)]
        dir: PathBuf,
        /// Comma-separated trader ids. Defaults to the config file's traders.
        #[arg(long)]
        traders: Option<String>,
        /// Config file used to discover trader ids.
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
}

fn parse_thresholds(raw: Option<&str>) -> Result<Vec<f64>> {
    let mut thresholds = match raw {
        Some(raw) => raw
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .with_context(|| format!("invalid threshold {s:?}"))
            })
            .collect::<Result<Vec<f64>>>()?,
        None => DEFAULT_THRESHOLDS.to_vec(),
    };
    if !thresholds.contains(&0.0) {
        thresholds.push(0.0);
    }
    Ok(thresholds)
}

async fn run(trader: &str, dir: &Path, thresholds: Vec<f64>) -> Result<()> {
    let db_path = dir.join("decisions.db");
    if !db_path.is_file() {
        bail!("no journal found at {}", db_path.display());
    }
    let journal = SqliteJournal::connect(db_path.to_string_lossy().as_ref()).await?;

    let records = journal.all(trader).await?;
    if records.is_empty() {
        bail!("trader {trader:?} has no journal records");
    }

    let trades = reconstruct_trades(&records);
    tracing::info!(
        "trader {}: {} record(s), {} completed trade(s)",
        trader,
        records.len(),
        trades.len()
    );

    let results = simulate(&trades, &thresholds);
    let report = build_report(trader, &records, trades.len(), results);
    let path = write_report(dir, &report)?;

    println!("Report written to {}", path.display());
    println!(
        "{:>10} {:>12} {:>8} {:>9} {:>8} {:>10} {:>13}",
        "threshold", "pnl", "trades", "winrate", "sharpe", "early", "missed"
    );
    for result in &report.results {
        println!(
            "{:>9.1}% {:>12.2} {:>8} {:>8.1}% {:>8.3} {:>10} {:>13.2}",
            result.threshold_pct,
            result.total_pnl,
            result.total_trades,
            result.win_rate,
            result.sharpe_ratio,
            result.early_closes,
            result.missed_profit,
        );
    }
    println!(
        "Best by sharpe: {}%, by pnl: {}%, by win rate: {}%",
        report.best_by_sharpe, report.best_by_pnl, report.best_by_win_rate
    );
    Ok(())
}

fn summarize(dir: &Path, traders: Option<&str>, config: &Path) -> Result<()> {
    let trader_ids: Vec<String> = match traders {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => AppConfig::load(config)
            .with_context(|| {
                format!(
                    "no --traders given and config {} is unreadable",
                    config.display()
                )
            })?
            .traders
            .into_iter()
            .map(|t| t.id)
            .collect(),
    };

    let mut reports = Vec::new();
    for trader_id in trader_ids {
        let report = latest_report(dir, &trader_id)?;
        reports.push((trader_id, report));
    }
    print!("{}", summarize_table(&reports));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            trader,
            dir,
            thresholds,
        } => {
            let thresholds = parse_thresholds(thresholds.as_deref())?;
            run(&trader, &dir, thresholds).await
        }
        Command::Summarize {
            dir,
            traders,
            config,
        } => summarize(&dir, traders.as_deref(), &config),
    }
}
