// =============================================================================
// OpenAI-compatible chat-completions provider
// =============================================================================
//
// Used directly for `ProviderKind::OpenAi` and reused (different
// `base_url`) for any self-hosted OpenAI-compatible endpoint an operator
// configures via `ProviderKind::OpenAiCompatible`.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::super::{ModelClient, ModelError, ModelReply};

pub struct OpenAiCompatibleClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("failed to build reqwest client"),
            base_url: base_url.into(),
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(api_key, model, "https://api.openai.com/v1/chat/completions")
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    #[instrument(skip(self, ctx, system_prompt, user_prompt), name = "openai_compatible::decide")]
    async fn decide(
        &self,
        ctx: &CancellationToken,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ModelReply, ModelError> {
        let started = Instant::now();
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let request = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let resp = tokio::select! {
            res = request => res.map_err(|e| ModelError::Other(e.to_string()))?,
            _ = ctx.cancelled() => return Err(ModelError::Timeout),
        };

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Other(format!("invalid JSON response: {e}")))?;

        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(ModelError::AuthFailed),
            StatusCode::TOO_MANY_REQUESTS => return Err(ModelError::RateLimited),
            s if s.is_server_error() => {
                return Err(ModelError::Unavailable(format!("status {s}")))
            }
            s => return Err(ModelError::Other(format!("unexpected status {s}: {payload}"))),
        }

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ModelError::Other("missing choices[0].message.content in response".to_string())
            })?
            .to_string();
        let tokens_in = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let tokens_out = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let latency_ms = started.elapsed().as_millis() as u64;

        debug!(tokens_in, tokens_out, latency_ms, "openai-compatible reply received");

        Ok(ModelReply {
            text,
            tokens_in,
            tokens_out,
            latency_ms,
        })
    }
}
