use std::collections::HashSet;
use std::path::Path;

use ai_client::ModelProvider;
use anyhow::{bail, Context as _, Result};
use decision_engine::MultiAgentConfig;
use risk_manager::KillSwitchConfig;
use serde::{Deserialize, Serialize};
use trading_core::LeveragePolicy;

/// One trader's standing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderConfig {
    pub id: String,
    pub name: String,
    pub ai_model: ModelProvider,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    pub initial_balance: f64,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,
}

fn default_scan_interval() -> u64 {
    300
}

fn default_log_dir() -> String {
    "decision_logs".to_string()
}

fn default_stop_trading_minutes() -> i64 {
    60
}

/// Top-level JSON configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub traders: Vec<TraderConfig>,
    #[serde(default)]
    pub leverage: LeveragePolicy,
    #[serde(default)]
    pub auto_take_profit_pct: f64,
    #[serde(default)]
    pub max_daily_loss: f64,
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default = "default_stop_trading_minutes")]
    pub stop_trading_minutes: i64,
    #[serde(default)]
    pub multi_agent: Option<MultiAgentConfig>,
    /// Directory hosting the embedded journal and backtest reports.
    #[serde(default = "default_log_dir")]
    pub decision_log_dir: String,
    /// Optional network journal. `DATABASE_URL` in the environment wins.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Any failure refuses to start the process.
    pub fn validate(&self) -> Result<()> {
        if self.traders.is_empty() {
            bail!("config must define at least one trader");
        }

        let mut ids = HashSet::new();
        for trader in &self.traders {
            if !ids.insert(trader.id.as_str()) {
                bail!("duplicate trader id {:?}", trader.id);
            }
            if trader.initial_balance <= 0.0 {
                bail!("trader {:?} initial_balance must be positive", trader.id);
            }
            if trader.scan_interval_seconds == 0 {
                bail!("trader {:?} scan_interval_seconds must be positive", trader.id);
            }
            if trader.ai_model == ModelProvider::Custom
                && (trader.api_url.is_none()
                    || trader.model_name.is_none()
                    || trader.api_key.is_empty())
            {
                bail!(
                    "trader {:?} uses a custom provider and must set api_url, api_key, and model_name",
                    trader.id
                );
            }
        }

        if let Some(multi_agent) = &self.multi_agent {
            if multi_agent.enabled {
                multi_agent.validate()?;
            }
        }

        Ok(())
    }

    pub fn multi_agent_enabled(&self) -> bool {
        self.multi_agent.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn kill_switch(&self) -> KillSwitchConfig {
        KillSwitchConfig {
            max_drawdown: self.max_drawdown,
            max_daily_loss: self.max_daily_loss,
            stop_trading_minutes: self.stop_trading_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader(id: &str) -> TraderConfig {
        TraderConfig {
            id: id.to_string(),
            name: id.to_string(),
            ai_model: ModelProvider::DeepSeek,
            api_key: "key".to_string(),
            api_url: None,
            model_name: None,
            initial_balance: 10000.0,
            scan_interval_seconds: 300,
        }
    }

    fn config(traders: Vec<TraderConfig>) -> AppConfig {
        AppConfig {
            traders,
            leverage: LeveragePolicy::default(),
            auto_take_profit_pct: 0.0,
            max_daily_loss: 10.0,
            max_drawdown: 30.0,
            stop_trading_minutes: 60,
            multi_agent: None,
            decision_log_dir: "decision_logs".to_string(),
            database_url: None,
        }
    }

    #[test]
    fn accepts_a_minimal_config() {
        config(vec![trader("t1"), trader("t2")]).validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_trader_ids() {
        assert!(config(vec![trader("t1"), trader("t1")]).validate().is_err());
    }

    #[test]
    fn rejects_incomplete_custom_provider() {
        let mut custom = trader("t1");
        custom.ai_model = ModelProvider::Custom;
        assert!(config(vec![custom]).validate().is_err());
    }

    #[test]
    fn parses_a_full_config_file() {
        let json = r#"{
            "traders": [
                {"id": "trader-1", "name": "Momentum", "ai_model": "deepseek",
                 "api_key": "sk-1", "initial_balance": 10000}
            ],
            "leverage": {"btc_eth_leverage": 10, "altcoin_leverage": 3},
            "auto_take_profit_pct": 2.0,
            "max_daily_loss": 5.0,
            "max_drawdown": 20.0,
            "stop_trading_minutes": 120,
            "multi_agent": {
                "enabled": true,
                "consensus_mode": "voting",
                "fast_first": false,
                "min_agents": 1,
                "max_wait_time": 180,
                "agents": [
                    {"id": "a1", "name": "fast", "model": "groq", "api_key": "k1"}
                ]
            }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.traders[0].scan_interval_seconds, 300);
        assert_eq!(config.leverage.btc_eth_leverage, 10.0);
        assert!(config.multi_agent_enabled());
        assert_eq!(config.decision_log_dir, "decision_logs");
    }

    #[test]
    fn invalid_consensus_mode_fails_to_parse() {
        let json = r#"{
            "enabled": true,
            "consensus_mode": "plurality",
            "min_agents": 1,
            "max_wait_time": 60,
            "agents": []
        }"#;
        assert!(serde_json::from_str::<MultiAgentConfig>(json).is_err());
    }
}
