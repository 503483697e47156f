use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position direction on a perpetual futures contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Side::Long),
            "short" => Some(Side::Short),
            _ => None,
        }
    }

    /// The action that closes a position on this side.
    pub fn close_action(&self) -> TradeAction {
        match self {
            Side::Long => TradeAction::CloseLong,
            Side::Short => TradeAction::CloseShort,
        }
    }
}

/// Action a decision can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
    Wait,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::OpenLong => "open_long",
            TradeAction::OpenShort => "open_short",
            TradeAction::CloseLong => "close_long",
            TradeAction::CloseShort => "close_short",
            TradeAction::Hold => "hold",
            TradeAction::Wait => "wait",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open_long" => Some(TradeAction::OpenLong),
            "open_short" => Some(TradeAction::OpenShort),
            "close_long" => Some(TradeAction::CloseLong),
            "close_short" => Some(TradeAction::CloseShort),
            "hold" => Some(TradeAction::Hold),
            "wait" => Some(TradeAction::Wait),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, TradeAction::OpenLong | TradeAction::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, TradeAction::CloseLong | TradeAction::CloseShort)
    }

    /// The side an open/close action operates on, if any.
    pub fn side(&self) -> Option<Side> {
        match self {
            TradeAction::OpenLong | TradeAction::CloseLong => Some(Side::Long),
            TradeAction::OpenShort | TradeAction::CloseShort => Some(Side::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account totals at the moment a cycle starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_balance: f64,
    pub available_balance: f64,
    pub unrealized_profit: f64,
    pub position_count: usize,
    pub margin_used_pct: f64,
}

/// An open perpetual position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_profit: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
}

impl Position {
    /// Margin locked by this position at its entry price.
    pub fn margin_used(&self) -> f64 {
        if self.leverage > 0.0 {
            self.quantity * self.entry_price / self.leverage
        } else {
            0.0
        }
    }

    /// Unrealized return on margin, in percent. 0 when no margin is locked.
    pub fn return_on_margin_pct(&self) -> f64 {
        let margin = self.margin_used();
        if margin > 0.0 {
            self.unrealized_profit / margin * 100.0
        } else {
            0.0
        }
    }
}

/// A coin the market scanner considers worth trading this cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateCoin {
    pub symbol: String,
    pub price: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
}

/// 24h market data for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    pub funding_rate: f64,
}

/// Open-interest leaderboard entry for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterestTop {
    pub symbol: String,
    pub open_interest: f64,
    pub oi_change_24h_pct: f64,
    pub long_short_ratio: f64,
}

/// Leverage caps per symbol class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LeveragePolicy {
    pub btc_eth_leverage: f64,
    pub altcoin_leverage: f64,
}

impl Default for LeveragePolicy {
    fn default() -> Self {
        Self {
            btc_eth_leverage: 5.0,
            altcoin_leverage: 5.0,
        }
    }
}

impl LeveragePolicy {
    /// Cap for a symbol: majors get the BTC/ETH cap, everything else the altcoin cap.
    pub fn cap_for(&self, symbol: &str) -> f64 {
        match symbol {
            "BTCUSDT" | "ETHUSDT" => self.btc_eth_leverage,
            _ => self.altcoin_leverage,
        }
    }
}

/// Everything a decision sees for one cycle.
///
/// The scheduler owns the Context for the duration of a cycle. When the
/// multi-agent engine fans out, each agent receives [`Context::clone_for_agent`]
/// so no two agents ever write the same map; positions and candidates are
/// shared read-only behind `Arc`.
#[derive(Debug, Clone)]
pub struct Context {
    pub now: DateTime<Utc>,
    pub runtime_minutes: i64,
    pub cycle_number: i64,
    pub account: AccountSnapshot,
    pub positions: Arc<Vec<Position>>,
    pub candidates: Arc<Vec<CandidateCoin>>,
    pub market_data: HashMap<String, MarketData>,
    pub open_interest: HashMap<String, OpenInterestTop>,
    pub leverage: LeveragePolicy,
    pub performance: serde_json::Value,
}

impl Context {
    /// Per-agent clone: map fields start empty so each agent populates its
    /// own; slices stay shared.
    pub fn clone_for_agent(&self) -> Self {
        Self {
            now: self.now,
            runtime_minutes: self.runtime_minutes,
            cycle_number: self.cycle_number,
            account: self.account.clone(),
            positions: Arc::clone(&self.positions),
            candidates: Arc::clone(&self.candidates),
            market_data: HashMap::new(),
            open_interest: HashMap::new(),
            leverage: self.leverage,
            performance: self.performance.clone(),
        }
    }
}

/// One structured decision emitted by a model.
///
/// Numeric fields the model omits deserialize to 0, strings to "".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: TradeAction,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub leverage: f64,
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// The canonical "do nothing" decision.
    pub fn wait(reasoning: impl Into<String>) -> Self {
        Self {
            symbol: "ALL".to_string(),
            action: TradeAction::Wait,
            quantity: 0.0,
            leverage: 0.0,
            take_profit: 0.0,
            stop_loss: 0.0,
            confidence: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

/// The authoritative output of one decision cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullDecision {
    pub decisions: Vec<Decision>,
    pub cot_trace: String,
    pub user_prompt: String,
    pub raw_response: String,
}

impl FullDecision {
    pub fn wait(reasoning: impl Into<String>) -> Self {
        Self {
            decisions: vec![Decision::wait(reasoning)],
            cot_trace: String::new(),
            user_prompt: String::new(),
            raw_response: String::new(),
        }
    }
}

/// Result of executing one decision against the position store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: TradeAction,
    pub symbol: String,
    pub quantity: f64,
    pub leverage: Option<f64>,
    pub price: f64,
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// One journal entry: everything that happened in one trader cycle.
///
/// `(trader_id, cycle_number)` is unique per journal. Cycle 0 is the seed
/// record carrying the trader's initial balance with no positions and no
/// actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub trader_id: String,
    pub cycle_number: i64,
    pub timestamp: DateTime<Utc>,
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
    pub positions: Vec<Position>,
    pub actions: Vec<ActionRecord>,
    pub candidate_coins: Vec<String>,
    pub execution_log: Vec<String>,
}

impl DecisionRecord {
    /// The seed record for cycle 0.
    pub fn seed(trader_id: &str, initial_balance: f64, at: DateTime<Utc>) -> Self {
        Self {
            trader_id: trader_id.to_string(),
            cycle_number: 0,
            timestamp: at,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decision_json: "{\"seed\":true}".to_string(),
            raw_response: None,
            success: true,
            error_message: None,
            account_total_balance: initial_balance,
            account_available_balance: initial_balance,
            account_unrealized_profit: 0.0,
            account_margin_used_pct: 0.0,
            positions: Vec::new(),
            actions: Vec::new(),
            candidate_coins: Vec::new(),
            execution_log: Vec::new(),
        }
    }

    pub fn account_snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            total_balance: self.account_total_balance,
            available_balance: self.account_available_balance,
            unrealized_profit: self.account_unrealized_profit,
            position_count: self.positions.len(),
            margin_used_pct: self.account_margin_used_pct,
        }
    }
}
