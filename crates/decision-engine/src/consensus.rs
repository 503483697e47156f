use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use trading_core::{Decision, FullDecision, TradeAction};

/// Rule that reduces multiple agent decisions to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMode {
    Voting,
    Weighted,
    Unanimous,
    Best,
}

impl ConsensusMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voting" => Some(ConsensusMode::Voting),
            "weighted" => Some(ConsensusMode::Weighted),
            "unanimous" => Some(ConsensusMode::Unanimous),
            "best" => Some(ConsensusMode::Best),
            _ => None,
        }
    }
}

/// One agent's valid contribution to the merge.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub agent_id: String,
    pub weight: Option<f64>,
    pub full: FullDecision,
}

/// Merge valid agent results under the configured mode. Deterministic given
/// the same results in the same order.
pub fn merge(mode: ConsensusMode, results: &[AgentResult]) -> FullDecision {
    let mut merged = match mode {
        ConsensusMode::Voting => merge_voting(results),
        ConsensusMode::Weighted => merge_weighted(results),
        ConsensusMode::Unanimous => merge_unanimous(results),
        ConsensusMode::Best => merge_best(results),
    };
    merged.cot_trace = merged_cot(results);
    if merged.user_prompt.is_empty() {
        if let Some(first) = results.first() {
            merged.user_prompt = first.full.user_prompt.clone();
        }
    }
    merged
}

/// Chain-of-thought of the first three agents, tagged by agent id.
fn merged_cot(results: &[AgentResult]) -> String {
    results
        .iter()
        .take(3)
        .map(|r| format!("[{}]\n{}", r.agent_id, r.full.cot_trace))
        .collect::<Vec<_>>()
        .join("\n\n")
}

type GroupKey = (String, TradeAction);

/// Group keys in first-seen order with per-agent deduplication: one agent
/// contributes to a given (symbol, action) group at most once.
fn grouped<'a>(
    results: &'a [AgentResult],
) -> (Vec<GroupKey>, HashMap<GroupKey, Vec<(usize, &'a Decision)>>) {
    let mut order: Vec<GroupKey> = Vec::new();
    let mut groups: HashMap<GroupKey, Vec<(usize, &Decision)>> = HashMap::new();

    for (agent_idx, result) in results.iter().enumerate() {
        let mut seen: HashSet<GroupKey> = HashSet::new();
        for decision in &result.full.decisions {
            let key = (decision.symbol.clone(), decision.action);
            if !seen.insert(key.clone()) {
                continue;
            }
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push((agent_idx, decision));
        }
    }
    (order, groups)
}

/// Majority vote: a (symbol, action) group wins when strictly more than
/// max(1, n/2) agents emitted it.
fn merge_voting(results: &[AgentResult]) -> FullDecision {
    let n = results.len();
    let threshold = std::cmp::max(1, n / 2);
    let (order, groups) = grouped(results);

    let mut decisions = Vec::new();
    for key in &order {
        let contributors = &groups[key];
        if contributors.len() > threshold {
            let mut decision = contributors[0].1.clone();
            decision.reasoning = format!(
                "{} of {} agents agreed: {}",
                contributors.len(),
                n,
                decision.reasoning
            );
            decisions.push(decision);
        }
    }

    if decisions.is_empty() {
        return FullDecision::wait("No majority among agents");
    }
    FullDecision {
        decisions,
        cot_trace: String::new(),
        user_prompt: String::new(),
        raw_response: String::new(),
    }
}

/// Weighted vote: normalized agent weights, a group wins when its weight sum
/// exceeds 0.5; on same-symbol collisions the heavier group survives, ties
/// broken by alphabetical action.
fn merge_weighted(results: &[AgentResult]) -> FullDecision {
    let n = results.len();
    let raw: Vec<f64> = results
        .iter()
        .map(|r| r.weight.unwrap_or(1.0 / n as f64))
        .collect();
    let total: f64 = raw.iter().sum();
    let weights: Vec<f64> = if total > 0.0 {
        raw.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / n as f64; n]
    };

    let (order, groups) = grouped(results);

    struct Winner {
        decision: Decision,
        weight_sum: f64,
    }
    let mut winners: Vec<(GroupKey, Winner)> = Vec::new();
    for key in &order {
        let contributors = &groups[key];
        let weight_sum: f64 = contributors.iter().map(|(i, _)| weights[*i]).sum();
        if weight_sum > 0.5 {
            let confidence: f64 = contributors
                .iter()
                .map(|(i, d)| weights[*i] * d.confidence)
                .sum::<f64>()
                / weight_sum;
            let mut decision = contributors[0].1.clone();
            decision.confidence = confidence;
            decision.reasoning = format!(
                "weighted consensus {:.0}%: {}",
                weight_sum * 100.0,
                decision.reasoning
            );
            winners.push((key.clone(), Winner { decision, weight_sum }));
        }
    }

    // One action per symbol: heavier weight sum wins, then alphabetical action.
    let mut by_symbol: Vec<(String, Winner)> = Vec::new();
    for ((symbol, action), winner) in winners {
        match by_symbol.iter().position(|(s, _)| *s == symbol) {
            Some(i) => {
                let existing = &mut by_symbol[i].1;
                let replace = winner.weight_sum > existing.weight_sum
                    || (winner.weight_sum == existing.weight_sum
                        && action.as_str() < existing.decision.action.as_str());
                if replace {
                    *existing = winner;
                }
            }
            None => by_symbol.push((symbol, winner)),
        }
    }

    let decisions: Vec<Decision> = by_symbol.into_iter().map(|(_, w)| w.decision).collect();
    if decisions.is_empty() {
        return FullDecision::wait("No weighted majority among agents");
    }
    FullDecision {
        decisions,
        cot_trace: String::new(),
        user_prompt: String::new(),
        raw_response: String::new(),
    }
}

/// All agents must emit the same (symbol, action) set as agent 0; any
/// disagreement collapses to wait.
fn merge_unanimous(results: &[AgentResult]) -> FullDecision {
    let key_set = |result: &AgentResult| -> HashSet<GroupKey> {
        result
            .full
            .decisions
            .iter()
            .map(|d| (d.symbol.clone(), d.action))
            .collect()
    };

    let first = &results[0];
    let reference = key_set(first);
    for other in &results[1..] {
        if key_set(other) != reference {
            return FullDecision::wait("Agents did not agree");
        }
    }
    first.full.clone()
}

/// Pick the agent whose list holds the highest-confidence open/close action;
/// a confidence-0 close still outranks every wait. Without any trade action
/// anywhere, the highest-confidence wait/hold wins.
fn merge_best(results: &[AgentResult]) -> FullDecision {
    let mut best_trade: Option<(f64, usize)> = None;
    let mut best_idle: Option<(f64, usize)> = None;

    for (idx, result) in results.iter().enumerate() {
        for decision in &result.full.decisions {
            let slot = if decision.action.is_open() || decision.action.is_close() {
                &mut best_trade
            } else {
                &mut best_idle
            };
            let better = match slot {
                Some((conf, _)) => decision.confidence > *conf,
                None => true,
            };
            if better {
                *slot = Some((decision.confidence, idx));
            }
        }
    }

    let chosen = best_trade.or(best_idle).map(|(_, idx)| idx).unwrap_or(0);
    results[chosen].full.clone()
}
