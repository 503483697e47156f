use std::collections::HashSet;

use ai_client::ModelProvider;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusMode;

/// One AI agent participating in consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub model: ModelProvider,
    pub api_key: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Multi-agent consensus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentConfig {
    #[serde(default)]
    pub enabled: bool,
    pub consensus_mode: ConsensusMode,
    #[serde(default)]
    pub fast_first: bool,
    pub min_agents: usize,
    /// Overall collection deadline, in seconds.
    pub max_wait_time: u64,
    pub agents: Vec<AgentConfig>,
}

impl MultiAgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            bail!("multi_agent.agents must not be empty");
        }
        if self.min_agents < 1 {
            bail!("multi_agent.min_agents must be at least 1");
        }
        if self.min_agents > self.agents.len() {
            bail!(
                "multi_agent.min_agents ({}) exceeds the number of agents ({})",
                self.min_agents,
                self.agents.len()
            );
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            if !ids.insert(agent.id.as_str()) {
                bail!("duplicate agent id {:?}", agent.id);
            }
            if let Some(weight) = agent.weight {
                if !(0.0..=1.0).contains(&weight) {
                    bail!("agent {:?} weight {} outside [0, 1]", agent.id, weight);
                }
            }
            if agent.model == ModelProvider::Custom
                && (agent.api_url.is_none() || agent.model_name.is_none() || agent.api_key.is_empty())
            {
                bail!(
                    "agent {:?} uses a custom provider and must set api_url, api_key, and model_name",
                    agent.id
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentConfig {
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

    fn config(agents: Vec<AgentConfig>) -> MultiAgentConfig {
        MultiAgentConfig {
            enabled: true,
            consensus_mode: ConsensusMode::Voting,
            fast_first: false,
            min_agents: 1,
            max_wait_time: 120,
            agents,
        }
    }

    #[test]
    fn accepts_a_well_formed_config() {
        config(vec![agent("a1"), agent("a2")]).validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_agent_ids() {
        assert!(config(vec![agent("a1"), agent("a1")]).validate().is_err());
    }

    #[test]
    fn rejects_min_agents_beyond_agent_count() {
        let mut cfg = config(vec![agent("a1")]);
        cfg.min_agents = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let mut bad = agent("a1");
        bad.weight = Some(1.5);
        assert!(config(vec![bad]).validate().is_err());
    }

    #[test]
    fn custom_provider_requires_url_and_model_name() {
        let mut custom = agent("a1");
        custom.model = ModelProvider::Custom;
        assert!(config(vec![custom.clone()]).validate().is_err());

        custom.api_url = Some("https://llm.internal/v1/chat/completions".to_string());
        custom.model_name = Some("local-model".to_string());
        config(vec![custom]).validate().unwrap();
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "enabled": true,
            "consensus_mode": "weighted",
            "fast_first": true,
            "min_agents": 2,
            "max_wait_time": 90,
            "agents": [
                {"id": "a1", "name": "fast", "model": "groq", "api_key": "k1", "weight": 0.6},
                {"id": "a2", "name": "deep", "model": "deepseek", "api_key": "k2", "weight": 0.4}
            ]
        }"#;
        let cfg: MultiAgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.consensus_mode, ConsensusMode::Weighted);
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.agents[0].weight, Some(0.6));
        cfg.validate().unwrap();
    }
}
