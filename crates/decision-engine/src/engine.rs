use std::sync::Arc;
use std::time::Duration;

use ai_client::{CompletionClient, HttpCompletionClient};
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::Instant;
use trading_core::{Context, FullDecision, MarketSnapshotProvider};

use crate::assembler::run_decision;
use crate::config::{AgentConfig, MultiAgentConfig};
use crate::consensus::{merge, AgentResult};
use crate::error::EngineResult;

/// Fans one decision cycle out to every configured agent and merges the
/// valid results under the configured consensus mode.
pub struct MultiAgentEngine {
    config: MultiAgentConfig,
    agents: Vec<(AgentConfig, Arc<dyn CompletionClient>)>,
    market: Arc<dyn MarketSnapshotProvider>,
}

impl MultiAgentEngine {
    /// Build one provider-specific client per agent over the shared HTTP
    /// connection pool.
    pub fn from_config(
        config: MultiAgentConfig,
        http: reqwest::Client,
        market: Arc<dyn MarketSnapshotProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let mut agents: Vec<(AgentConfig, Arc<dyn CompletionClient>)> = Vec::new();
        for agent in &config.agents {
            let client = HttpCompletionClient::new(
                http.clone(),
                agent.model,
                agent.api_key.clone(),
                agent.api_url.clone(),
                agent.model_name.clone(),
            )?;
            agents.push((agent.clone(), Arc::new(client)));
        }
        Ok(Self {
            config,
            agents,
            market,
        })
    }

    /// Engine over pre-built clients. Used by tests and embedded setups.
    pub fn with_clients(
        config: MultiAgentConfig,
        agents: Vec<(AgentConfig, Arc<dyn CompletionClient>)>,
        market: Arc<dyn MarketSnapshotProvider>,
    ) -> Self {
        Self {
            config,
            agents,
            market,
        }
    }

    /// Run every agent against its own clone of the context and merge.
    ///
    /// Never fails: with zero valid results the merged decision is a single
    /// wait explaining that all agents errored.
    pub async fn decide(&self, ctx: &Context) -> FullDecision {
        let (tx, mut rx) = mpsc::channel::<(String, Option<f64>, EngineResult<FullDecision>)>(
            self.agents.len().max(1),
        );

        let mut handles = Vec::with_capacity(self.agents.len());
        for (agent, client) in &self.agents {
            let mut agent_ctx = ctx.clone_for_agent();
            let agent_id = agent.id.clone();
            let weight = agent.weight;
            let client = Arc::clone(client);
            let market = Arc::clone(&self.market);
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                // Each agent fills its own private maps; the shared slices
                // stay read-only.
                let mut symbols: Vec<String> = agent_ctx
                    .positions
                    .iter()
                    .map(|p| p.symbol.clone())
                    .chain(agent_ctx.candidates.iter().map(|c| c.symbol.clone()))
                    .collect();
                symbols.sort();
                symbols.dedup();
                match market.market_data(&symbols).await {
                    Ok(data) => agent_ctx.market_data = data,
                    Err(e) => tracing::warn!("agent {}: market data fetch failed: {}", agent_id, e),
                }
                match market.open_interest_top().await {
                    Ok(data) => agent_ctx.open_interest = data,
                    Err(e) => {
                        tracing::warn!("agent {}: open interest fetch failed: {}", agent_id, e)
                    }
                }

                let result = run_decision(&agent_ctx, client.as_ref()).await;
                let _ = tx.send((agent_id, weight, result)).await;
            }));
        }
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(self.config.max_wait_time);
        let mut valid: Vec<AgentResult> = Vec::new();
        let mut invalid = 0usize;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((agent_id, weight, Ok(full)))) if !full.decisions.is_empty() => {
                    tracing::info!(
                        "agent {} returned {} decision(s)",
                        agent_id,
                        full.decisions.len()
                    );
                    valid.push(AgentResult {
                        agent_id,
                        weight,
                        full,
                    });
                    if self.config.fast_first && valid.len() >= self.config.min_agents {
                        tracing::info!(
                            "fast-first satisfied with {}/{} agents",
                            valid.len(),
                            self.agents.len()
                        );
                        break;
                    }
                }
                Ok(Some((agent_id, _, Ok(_)))) => {
                    invalid += 1;
                    tracing::warn!("agent {} returned an empty decision list", agent_id);
                }
                Ok(Some((agent_id, _, Err(e)))) => {
                    invalid += 1;
                    tracing::warn!("agent {} failed: {}", agent_id, e);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "consensus window of {}s elapsed with {} valid / {} invalid results",
                        self.config.max_wait_time,
                        valid.len(),
                        invalid
                    );
                    break;
                }
            }
        }

        // Cancel whatever is still in flight.
        for handle in &handles {
            handle.abort();
        }

        if valid.is_empty() {
            return FullDecision::wait("All agents returned errors");
        }
        merge(self.config.consensus_mode, &valid)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ai_client::{AiError, AiResult, ModelProvider};
    use async_trait::async_trait;
    use chrono::Utc;
    use trading_core::{
        AccountSnapshot, CandidateCoin, LeveragePolicy, MarketData, OpenInterestTop, TradeAction,
    };

    use super::*;
    use crate::consensus::ConsensusMode;

    struct ScriptedClient {
        reply: Option<String>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _system: &str, _user: &str) -> AiResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(AiError::EmptyCompletion),
            }
        }

        fn model_label(&self) -> &str {
            "scripted"
        }
    }

    struct CannedMarket;

    #[async_trait]
    impl MarketSnapshotProvider for CannedMarket {
        async fn candidates(&self) -> Result<Vec<CandidateCoin>> {
            Ok(vec![])
        }

        async fn market_data(
            &self,
            symbols: &[String],
        ) -> Result<HashMap<String, MarketData>> {
            Ok(symbols
                .iter()
                .map(|s| {
                    (
                        s.clone(),
                        MarketData {
                            symbol: s.clone(),
                            price: 20000.0,
                            high_24h: 21000.0,
                            low_24h: 19000.0,
                            change_24h_pct: 1.0,
                            volume_24h: 1_000_000.0,
                            funding_rate: 0.0001,
                        },
                    )
                })
                .collect())
        }

        async fn open_interest_top(&self) -> Result<HashMap<String, OpenInterestTop>> {
            Ok(HashMap::new())
        }
    }

    fn context() -> Context {
        Context {
            now: Utc::now(),
            runtime_minutes: 0,
            cycle_number: 1,
            account: AccountSnapshot::default(),
            positions: Arc::new(vec![]),
            candidates: Arc::new(vec![CandidateCoin {
                symbol: "BTCUSDT".to_string(),
                price: 20000.0,
                change_24h_pct: 1.0,
                volume_24h: 1_000_000.0,
            }]),
            market_data: HashMap::new(),
            open_interest: HashMap::new(),
            leverage: LeveragePolicy::default(),
            performance: serde_json::Value::Null,
        }
    }

    fn agent_config(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            name: id.to_string(),
            model: ModelProvider::DeepSeek,
            api_key: "key".to_string(),
            api_url: None,
            model_name: None,
            role: None,
            weight: None,
        }
    }

    fn engine_config(mode: ConsensusMode, fast_first: bool, min_agents: usize) -> MultiAgentConfig {
        MultiAgentConfig {
            enabled: true,
            consensus_mode: mode,
            fast_first,
            min_agents,
            max_wait_time: 5,
            agents: vec![],
        }
    }

    fn scripted(
        reply: Option<&str>,
        delay_ms: u64,
    ) -> (Arc<dyn CompletionClient>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = ScriptedClient {
            reply: reply.map(str::to_string),
            delay: Duration::from_millis(delay_ms),
            calls: Arc::clone(&calls),
        };
        (Arc::new(client), calls)
    }

    const OPEN_LONG: &str =
        r#"[{"symbol":"BTCUSDT","action":"open_long","quantity":0.1,"leverage":5,"confidence":80,"reasoning":"momentum"}]"#;
    const WAIT: &str = r#"[{"symbol":"ALL","action":"wait","reasoning":"flat"}]"#;

    #[tokio::test]
    async fn voting_consensus_across_three_agents() {
        let (c1, _) = scripted(Some(OPEN_LONG), 0);
        let (c2, _) = scripted(Some(OPEN_LONG), 0);
        let (c3, _) = scripted(Some(WAIT), 0);
        let engine = MultiAgentEngine::with_clients(
            engine_config(ConsensusMode::Voting, false, 1),
            vec![
                (agent_config("a1"), c1),
                (agent_config("a2"), c2),
                (agent_config("a3"), c3),
            ],
            Arc::new(CannedMarket),
        );

        let merged = engine.decide(&context()).await;
        assert_eq!(merged.decisions.len(), 1);
        assert_eq!(merged.decisions[0].symbol, "BTCUSDT");
        assert_eq!(merged.decisions[0].action, TradeAction::OpenLong);
        assert!(merged.cot_trace.contains("[a1]"));
    }

    #[tokio::test]
    async fn all_agents_failing_yields_wait() {
        let (c1, _) = scripted(None, 0);
        let (c2, _) = scripted(Some("no json here"), 0);
        let engine = MultiAgentEngine::with_clients(
            engine_config(ConsensusMode::Voting, false, 1),
            vec![(agent_config("a1"), c1), (agent_config("a2"), c2)],
            Arc::new(CannedMarket),
        );

        let merged = engine.decide(&context()).await;
        assert_eq!(merged.decisions.len(), 1);
        assert_eq!(merged.decisions[0].action, TradeAction::Wait);
        assert_eq!(merged.decisions[0].reasoning, "All agents returned errors");
    }

    #[tokio::test]
    async fn fast_first_returns_before_slow_agents() {
        let (fast, _) = scripted(Some(WAIT), 0);
        let (slow, _) = scripted(Some(OPEN_LONG), 30_000);
        let engine = MultiAgentEngine::with_clients(
            engine_config(ConsensusMode::Best, true, 1),
            vec![(agent_config("fast"), fast), (agent_config("slow"), slow)],
            Arc::new(CannedMarket),
        );

        let start = std::time::Instant::now();
        let merged = engine.decide(&context()).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(merged.decisions[0].action, TradeAction::Wait);
    }
}
