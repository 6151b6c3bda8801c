// =============================================================================
// Anthropic Messages API provider
// =============================================================================
//
// A `reqwest::Client` + `#[instrument]` + status-to-error-mapping client
// pointed at the Anthropic Messages endpoint. Error mapping into the five
// `ModelError` kinds follows a structured provider-reply handling idiom.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::super::{ModelClient, ModelError, ModelReply};

pub struct AnthropicClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("failed to build reqwest client"),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    #[instrument(skip(self, ctx, system_prompt, user_prompt), name = "anthropic::decide")]
    async fn decide(
        &self,
        ctx: &CancellationToken,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ModelReply, ModelError> {
        let started = Instant::now();
        let body = json!({
            "model": self.model,
            "max_tokens": 1024,
            "system": system_prompt,
            "messages": [{ "role": "user", "content": user_prompt }],
        });

        let request = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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

        let text = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ModelError::Other("missing content[0].text in response".to_string()))?
            .to_string();
        let tokens_in = payload["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
        let tokens_out = payload["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
        let latency_ms = started.elapsed().as_millis() as u64;

        debug!(tokens_in, tokens_out, latency_ms, "anthropic reply received");

        Ok(ModelReply {
            text,
            tokens_in,
            tokens_out,
            latency_ms,
        })
    }
}
