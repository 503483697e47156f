use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountSnapshot, CandidateCoin, MarketData, OpenInterestTop, Position, Side};

/// A filled order as reported by the position store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Exchange-side view of one trader's account.
///
/// Logically per-trader; the scheduler's cycle lock serializes all access,
/// so implementations never see concurrent calls for the same trader.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Current account totals.
    async fn account(&self) -> Result<AccountSnapshot>;

    /// All open positions.
    async fn positions(&self) -> Result<Vec<Position>>;

    /// Open a position. Returns the fill on success.
    async fn open(&self, symbol: &str, side: Side, quantity: f64, leverage: f64)
        -> Result<OrderFill>;

    /// Close the position on `(symbol, side)` entirely.
    async fn close(&self, symbol: &str, side: Side) -> Result<OrderFill>;

    /// Whether this is a paper/simulated account.
    fn is_paper(&self) -> bool;

    /// Store name for logging.
    fn store_name(&self) -> &str;
}

/// Source of candidate coins and per-symbol market data.
#[async_trait]
pub trait MarketSnapshotProvider: Send + Sync {
    /// Coins worth considering this cycle, ranked.
    async fn candidates(&self) -> Result<Vec<CandidateCoin>>;

    /// 24h market data for the given symbols.
    async fn market_data(&self, symbols: &[String]) -> Result<HashMap<String, MarketData>>;

    /// Open-interest leaderboard, keyed by symbol.
    async fn open_interest_top(&self) -> Result<HashMap<String, OpenInterestTop>>;
}
