use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use dashmap::DashMap;
use decision_journal::{DecisionJournal, PostgresJournal, SqliteJournal};
use risk_manager::RiskPolicy;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;

use ai_client::HttpCompletionClient;
use decision_engine::MultiAgentEngine;
use trading_agent::config::AppConfig;
use trading_agent::market::BinanceMarketProvider;
use trading_agent::paper_store::PaperPositionStore;
use trading_agent::scheduler::{DecisionSource, StatusRegistry, TraderLoop};
use trading_core::MarketSnapshotProvider;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting multi-trader decision engine");

    // Configuration is fatal at startup: a broken file refuses to boot.
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load(Path::new(&config_path))?;
    tracing::info!(
        "Configuration loaded: {} trader(s), multi-agent {}",
        config.traders.len(),
        if config.multi_agent_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );

    // Journal backend: a postgres DATABASE_URL selects the network store,
    // anything else stays on the embedded store under the log dir.
    let database_url = std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| config.database_url.clone());
    let journal: Arc<dyn DecisionJournal> = match database_url {
        Some(url) if url.starts_with("postgres") => {
            let journal = PostgresJournal::connect(&url).await?;
            tracing::info!("Journal backend: postgres");
            Arc::new(journal)
        }
        _ => {
            std::fs::create_dir_all(&config.decision_log_dir)
                .with_context(|| format!("creating {}", config.decision_log_dir))?;
            let path = PathBuf::from(&config.decision_log_dir).join("decisions.db");
            let journal = SqliteJournal::connect(path.to_string_lossy().as_ref()).await?;
            tracing::info!("Journal backend: sqlite at {}", path.display());
            Arc::new(journal)
        }
    };

    // One pooled HTTP client for every AI provider, owned here.
    let ai_http = ai_client::shared_http_client();
    let market: Arc<dyn MarketSnapshotProvider> =
        Arc::new(BinanceMarketProvider::new(reqwest::Client::new()));

    // Startup connectivity check: candidates must be reachable.
    let candidates = market
        .candidates()
        .await
        .map_err(|e| anyhow::anyhow!("market data connectivity check failed: {e}"))?;
    tracing::info!("Startup check: market data OK ({} candidates)", candidates.len());

    let status: StatusRegistry = Arc::new(DashMap::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    for trader in &config.traders {
        let store = Arc::new(PaperPositionStore::new(
            Arc::clone(&market),
            trader.initial_balance,
        ));

        let source = if config.multi_agent_enabled() {
            let multi_agent = config
                .multi_agent
                .clone()
                .expect("multi_agent_enabled implies config present");
            DecisionSource::Multi(MultiAgentEngine::from_config(
                multi_agent,
                ai_http.clone(),
                Arc::clone(&market),
            )?)
        } else {
            let client = HttpCompletionClient::new(
                ai_http.clone(),
                trader.ai_model,
                trader.api_key.clone(),
                trader.api_url.clone(),
                trader.model_name.clone(),
            )?;
            DecisionSource::Single(Arc::new(client))
        };

        let trader_loop = Arc::new(TraderLoop::new(
            trader.clone(),
            Arc::clone(&journal),
            store,
            Arc::clone(&market),
            source,
            RiskPolicy::new(config.leverage, config.auto_take_profit_pct),
            config.kill_switch(),
            Arc::clone(&status),
        ));

        trader_loop.bootstrap().await?;
        tracing::info!(
            "Trader {} ({}) ready: {}s interval, paper store",
            trader.id,
            trader.name,
            trader.scan_interval_seconds
        );
        handles.push(tokio::spawn(trader_loop.run(shutdown_rx.clone())));
    }

    tracing::info!("All trader loops running. Press Ctrl+C to stop.");

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    tracing::info!("Shutdown signal received, finishing in-flight cycles...");
    shutdown_tx.send(true).ok();
    for handle in handles {
        handle.await.ok();
    }

    for entry in status.iter() {
        tracing::info!(
            "trader {}: last cycle {} (success={}, paused={})",
            entry.key(),
            entry.value().cycle_number,
            entry.value().last_success,
            entry.value().paused
        );
    }
    tracing::info!("All trader loops stopped.");
    Ok(())
}
