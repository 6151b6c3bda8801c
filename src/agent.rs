// =============================================================================
// Agent registry
// =============================================================================
//
// An `Agent` is the static identity a competitor trades under; its mutable
// trading state lives separately in `ledger::Account`. The registry is a
// plain map loaded once from `Config` at startup — no dynamic registration.

use std::collections::HashMap;

use crate::config::{AgentConfig, Config, ProviderKind};

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub model: String,
    pub system_prompt: String,
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous trading agent competing \
against other agents in a simulated futures market. Respond with a single JSON \
object describing your trade decision.";

impl From<&AgentConfig> for Agent {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            display_name: cfg.display_name.clone(),
            provider: cfg.provider,
            model: cfg.model.clone(),
            system_prompt: cfg
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn from_config(config: &Config) -> Self {
        let agents = config
            .agents
            .iter()
            .map(|a| (a.id.clone(), Agent::from(a)))
            .collect();
        Self { agents }
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.agents.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut cfg = Config::default();
        cfg.agents.push(AgentConfig {
            id: "a1".into(),
            display_name: "Agent One".into(),
            provider: ProviderKind::Anthropic,
            model: "claude".into(),
            system_prompt: None,
            starting_balance: rust_decimal_macros::dec!(10000),
        });
        cfg
    }

    #[test]
    fn registry_builds_from_config() {
        let reg = AgentRegistry::from_config(&sample_config());
        assert_eq!(reg.len(), 1);
        let agent = reg.get("a1").unwrap();
        assert_eq!(agent.display_name, "Agent One");
        assert!(!agent.system_prompt.is_empty());
    }

    #[test]
    fn unknown_agent_is_none() {
        let reg = AgentRegistry::from_config(&sample_config());
        assert!(reg.get("missing").is_none());
    }
}
