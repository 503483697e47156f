use std::sync::Arc;
use std::time::Duration;

use ai_client::CompletionClient;
use anyhow::Result;
use backtest_engine::reconstruct_trades;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use decision_engine::{run_decision, MultiAgentEngine};
use decision_journal::{DecisionJournal, JournalError};
use risk_manager::{HaltState, KillSwitch, KillSwitchConfig, RiskPolicy};
use tokio::sync::{watch, Mutex};
use tokio::time;
use trading_core::{
    ActionRecord, Context, Decision, DecisionRecord, FullDecision, MarketSnapshotProvider,
    PositionStore,
};

use crate::config::TraderConfig;

/// Where a trader's decisions come from each cycle.
pub enum DecisionSource {
    Single(Arc<dyn CompletionClient>),
    Multi(MultiAgentEngine),
}

/// Live per-trader state shared with the supervisor for status logging.
#[derive(Debug, Clone, Default)]
pub struct TraderStatus {
    pub cycle_number: i64,
    pub last_success: bool,
    pub paused: bool,
}

pub type StatusRegistry = Arc<DashMap<String, TraderStatus>>;

/// What one tick produced. Mostly interesting to tests; the loop itself
/// only logs it.
#[derive(Debug)]
pub enum CycleResult {
    Recorded(DecisionRecord),
    /// Another instance already wrote this cycle.
    Conflict,
    /// Kill switch tripped; one halted record written.
    Halted,
    /// Inside a pause window; nothing written.
    Paused,
    /// The cycle lock was held; tick skipped.
    Skipped,
}

struct LoopState {
    next_cycle: i64,
    initial_balance: f64,
    started_at: DateTime<Utc>,
}

/// One trader's main loop: snapshot, decide, vet, execute, journal.
pub struct TraderLoop {
    trader: TraderConfig,
    journal: Arc<dyn DecisionJournal>,
    store: Arc<dyn PositionStore>,
    market: Arc<dyn MarketSnapshotProvider>,
    source: DecisionSource,
    policy: RiskPolicy,
    kill: Mutex<KillSwitch>,
    cycle_lock: Mutex<()>,
    state: Mutex<LoopState>,
    status: StatusRegistry,
}

impl TraderLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trader: TraderConfig,
        journal: Arc<dyn DecisionJournal>,
        store: Arc<dyn PositionStore>,
        market: Arc<dyn MarketSnapshotProvider>,
        source: DecisionSource,
        policy: RiskPolicy,
        kill_config: KillSwitchConfig,
        status: StatusRegistry,
    ) -> Self {
        Self {
            trader,
            journal,
            store,
            market,
            source,
            policy,
            kill: Mutex::new(KillSwitch::new(kill_config)),
            cycle_lock: Mutex::new(()),
            state: Mutex::new(LoopState {
                next_cycle: 1,
                initial_balance: 0.0,
                started_at: Utc::now(),
            }),
            status,
        }
    }

    pub fn trader_id(&self) -> &str {
        &self.trader.id
    }

    /// Seed the journal and recover cycle position so the first live cycle
    /// is latest + 1.
    pub async fn bootstrap(&self) -> Result<()> {
        self.journal
            .seed(&self.trader.id, self.trader.initial_balance)
            .await?;
        let restored = self.journal.restore_state(&self.trader.id).await?;

        let mut state = self.state.lock().await;
        state.next_cycle = restored.next_cycle;
        state.initial_balance = restored.initial_balance;
        state.started_at = Utc::now();

        tracing::info!(
            "trader {}: resuming at cycle {} (initial balance {:.2}, last total {:.2})",
            self.trader.id,
            restored.next_cycle,
            restored.initial_balance,
            restored.last_account.total_balance
        );
        Ok(())
    }

    /// Tick until shutdown. The in-flight cycle always finishes its journal
    /// append; shutdown is honored between cycles.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(Duration::from_secs(self.trader.scan_interval_seconds));
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.run_cycle().await {
                Ok(CycleResult::Recorded(record)) => {
                    tracing::info!(
                        "trader {}: cycle {} recorded ({} action(s), success={})",
                        self.trader.id,
                        record.cycle_number,
                        record.actions.len(),
                        record.success
                    );
                }
                Ok(CycleResult::Conflict) => {
                    tracing::info!("trader {}: cycle already recorded elsewhere", self.trader.id);
                }
                Ok(CycleResult::Halted) => {
                    tracing::warn!("trader {}: halted by kill switch", self.trader.id);
                }
                Ok(CycleResult::Paused) | Ok(CycleResult::Skipped) => {}
                Err(e) => {
                    tracing::error!("trader {}: cycle failed: {}", self.trader.id, e);
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("trader {}: loop stopped", self.trader.id);
    }

    /// One full cycle under the trader's exclusive cycle lock.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::debug!("trader {}: cycle already in progress, skipping tick", self.trader.id);
            return Ok(CycleResult::Skipped);
        };

        let now = Utc::now();
        let (cycle, runtime_minutes, initial_balance) = {
            let state = self.state.lock().await;
            (
                state.next_cycle,
                (now - state.started_at).num_minutes(),
                state.initial_balance,
            )
        };

        let account = self.store.account().await?;
        let positions = self.store.positions().await?;

        match self.kill.lock().await.check(now, initial_balance, &account) {
            HaltState::Active => {}
            HaltState::Paused { .. } => {
                self.update_status(cycle - 1, true, true);
                return Ok(CycleResult::Paused);
            }
            HaltState::JustHalted { reason, until } => {
                let record = DecisionRecord {
                    trader_id: self.trader.id.clone(),
                    cycle_number: cycle,
                    timestamp: now,
                    input_prompt: String::new(),
                    cot_trace: String::new(),
                    decision_json: "[]".to_string(),
                    raw_response: None,
                    success: false,
                    error_message: Some("halted".to_string()),
                    account_total_balance: account.total_balance,
                    account_available_balance: account.available_balance,
                    account_unrealized_profit: account.unrealized_profit,
                    account_margin_used_pct: account.margin_used_pct,
                    positions: positions.clone(),
                    actions: Vec::new(),
                    candidate_coins: Vec::new(),
                    execution_log: vec![format!("{reason}; trading paused until {until}")],
                };
                return self.finish_cycle(cycle, record, false).await;
            }
        }

        // Refresh the context from the market and the journal.
        let candidates = self.market.candidates().await?;
        let mut symbols: Vec<String> = positions
            .iter()
            .map(|p| p.symbol.clone())
            .chain(candidates.iter().map(|c| c.symbol.clone()))
            .collect();
        symbols.sort();
        symbols.dedup();
        let market_data = self.market.market_data(&symbols).await?;
        let open_interest = self.market.open_interest_top().await.unwrap_or_default();
        let performance = self.performance_summary().await;

        let ctx = Context {
            now,
            runtime_minutes,
            cycle_number: cycle,
            account: account.clone(),
            positions: Arc::new(positions.clone()),
            candidates: Arc::new(candidates.clone()),
            market_data,
            open_interest,
            leverage: self.policy.leverage,
            performance,
        };

        let decision_result = match &self.source {
            DecisionSource::Single(client) => run_decision(&ctx, client.as_ref()).await,
            DecisionSource::Multi(engine) => Ok(engine.decide(&ctx).await),
        };
        let candidate_symbols: Vec<String> =
            candidates.iter().map(|c| c.symbol.clone()).collect();

        let record = match decision_result {
            Ok(full) => {
                self.build_executed_record(&ctx, full, cycle, now, candidate_symbols)
                    .await?
            }
            Err(e) => {
                tracing::warn!("trader {}: decision failed: {}", self.trader.id, e);
                DecisionRecord {
                    trader_id: self.trader.id.clone(),
                    cycle_number: cycle,
                    timestamp: now,
                    input_prompt: String::new(),
                    cot_trace: String::new(),
                    decision_json: "[]".to_string(),
                    raw_response: None,
                    success: false,
                    error_message: Some(e.to_string()),
                    account_total_balance: account.total_balance,
                    account_available_balance: account.available_balance,
                    account_unrealized_profit: account.unrealized_profit,
                    account_margin_used_pct: account.margin_used_pct,
                    positions: positions.clone(),
                    actions: Vec::new(),
                    candidate_coins: candidate_symbols,
                    execution_log: Vec::new(),
                }
            }
        };

        let success = record.success;
        self.finish_cycle(cycle, record, success).await
    }

    /// Vet the decision list, execute the survivors in order, and assemble
    /// the cycle record.
    async fn build_executed_record(
        &self,
        ctx: &Context,
        full: FullDecision,
        cycle: i64,
        now: DateTime<Utc>,
        candidate_symbols: Vec<String>,
    ) -> Result<DecisionRecord> {
        let outcome = self.policy.apply(ctx, full.decisions.clone());
        let mut execution_log = outcome.rejections;

        // Sequential execution in the post-policy order.
        let mut actions = Vec::new();
        for decision in &outcome.decisions {
            if decision.action.is_open() || decision.action.is_close() {
                actions.push(self.execute_decision(decision, &mut execution_log).await);
            }
        }

        Ok(DecisionRecord {
            trader_id: self.trader.id.clone(),
            cycle_number: cycle,
            timestamp: now,
            input_prompt: full.user_prompt,
            cot_trace: full.cot_trace,
            decision_json: serde_json::to_string(&full.decisions)?,
            raw_response: Some(full.raw_response),
            success: true,
            error_message: None,
            account_total_balance: ctx.account.total_balance,
            account_available_balance: ctx.account.available_balance,
            account_unrealized_profit: ctx.account.unrealized_profit,
            account_margin_used_pct: ctx.account.margin_used_pct,
            positions: ctx.positions.as_ref().clone(),
            actions,
            candidate_coins: candidate_symbols,
            execution_log,
        })
    }

    async fn execute_decision(
        &self,
        decision: &Decision,
        execution_log: &mut Vec<String>,
    ) -> ActionRecord {
        let side = decision
            .action
            .side()
            .expect("only open/close actions reach execution");

        let result = if decision.action.is_open() {
            self.store
                .open(&decision.symbol, side, decision.quantity, decision.leverage)
                .await
        } else {
            self.store.close(&decision.symbol, side).await
        };

        match result {
            Ok(fill) => {
                execution_log.push(format!(
                    "executed {} {} qty={} @ {:.4} (order {})",
                    decision.action, fill.symbol, fill.quantity, fill.price, fill.order_id
                ));
                ActionRecord {
                    action: decision.action,
                    symbol: decision.symbol.clone(),
                    quantity: fill.quantity,
                    leverage: decision.action.is_open().then_some(decision.leverage),
                    price: fill.price,
                    order_id: Some(fill.order_id),
                    timestamp: fill.timestamp,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "trader {}: {} {} failed: {}",
                    self.trader.id,
                    decision.action,
                    decision.symbol,
                    e
                );
                execution_log.push(format!(
                    "failed {} {}: {}",
                    decision.action, decision.symbol, e
                ));
                ActionRecord {
                    action: decision.action,
                    symbol: decision.symbol.clone(),
                    quantity: decision.quantity,
                    leverage: decision.action.is_open().then_some(decision.leverage),
                    price: 0.0,
                    order_id: None,
                    timestamp: Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Append the record and advance the cycle counter. A conflict means
    /// another instance owns this cycle; the tick is idempotently skipped.
    async fn finish_cycle(
        &self,
        cycle: i64,
        record: DecisionRecord,
        success: bool,
    ) -> Result<CycleResult> {
        let halted = record.error_message.as_deref() == Some("halted");
        match self.journal.append(&record).await {
            Ok(()) => {
                self.state.lock().await.next_cycle = cycle + 1;
                self.update_status(cycle, success, halted);
                if halted {
                    Ok(CycleResult::Halted)
                } else {
                    Ok(CycleResult::Recorded(record))
                }
            }
            Err(JournalError::Conflict { .. }) => {
                self.state.lock().await.next_cycle = cycle + 1;
                Ok(CycleResult::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_status(&self, cycle_number: i64, last_success: bool, paused: bool) {
        self.status.insert(
            self.trader.id.clone(),
            TraderStatus {
                cycle_number,
                last_success,
                paused,
            },
        );
    }

    /// Compact summary of the trader's reconstructed history, embedded in
    /// every prompt.
    pub(crate) async fn performance_summary(&self) -> serde_json::Value {
        let records = match self.journal.all(&self.trader.id).await {
            Ok(records) => records,
            Err(e) => {
                tracing::debug!("trader {}: history read failed: {}", self.trader.id, e);
                return serde_json::Value::Null;
            }
        };
        let trades = reconstruct_trades(&records);
        if trades.is_empty() {
            return serde_json::Value::Null;
        }

        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        serde_json::json!({
            "closed_trades": trades.len(),
            "wins": wins,
            "win_rate_pct": wins as f64 / trades.len() as f64 * 100.0,
            "total_pnl": total_pnl,
        })
    }
}
