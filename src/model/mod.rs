// =============================================================================
// Model client
// =============================================================================

pub mod providers;
pub mod registry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,
    #[error("model provider rate limited the request")]
    RateLimited,
    #[error("model provider rejected credentials")]
    AuthFailed,
    #[error("model provider unavailable: {0}")]
    Unavailable(String),
    #[error("model call failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn decide(
        &self,
        ctx: &CancellationToken,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ModelReply, ModelError>;
}
