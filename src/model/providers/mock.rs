// =============================================================================
// Mock model client — used by tests
// =============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::super::{ModelClient, ModelError, ModelReply};

pub struct MockModel {
    pub reply_text: Mutex<String>,
}

impl MockModel {
    pub fn new(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: Mutex::new(reply_text.into()),
        }
    }

    pub fn set_reply(&self, text: impl Into<String>) {
        *self.reply_text.lock() = text.into();
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn decide(
        &self,
        _ctx: &CancellationToken,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<ModelReply, ModelError> {
        Ok(ModelReply {
            text: self.reply_text.lock().clone(),
            tokens_in: 10,
            tokens_out: 10,
            latency_ms: 1,
        })
    }
}
