// =============================================================================
// Model client registry
// =============================================================================
//
// Builds one `ModelClient` per agent from its configured `ProviderKind`,
// keeping the pipeline itself provider-agnostic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::AgentRegistry;
use crate::config::ProviderKind;

use super::providers::anthropic::AnthropicClient;
use super::providers::openai_compatible::OpenAiCompatibleClient;
use super::ModelClient;

pub struct ModelKeys {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_compatible_base_url: Option<String>,
}

pub fn build_registry(
    agents: &AgentRegistry,
    keys: &ModelKeys,
) -> HashMap<String, Arc<dyn ModelClient>> {
    let mut out = HashMap::new();
    for agent in agents.iter() {
        let client: Arc<dyn ModelClient> = match agent.provider {
            ProviderKind::Anthropic => Arc::new(AnthropicClient::new(
                keys.anthropic_api_key.clone().unwrap_or_default(),
                agent.model.clone(),
            )),
            ProviderKind::OpenAi => Arc::new(OpenAiCompatibleClient::openai(
                keys.openai_api_key.clone().unwrap_or_default(),
                agent.model.clone(),
            )),
            ProviderKind::OpenAiCompatible => Arc::new(OpenAiCompatibleClient::new(
                keys.openai_api_key.clone().unwrap_or_default(),
                agent.model.clone(),
                keys.openai_compatible_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            )),
        };
        out.insert(agent.id.clone(), client);
    }
    out
}
