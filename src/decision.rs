// =============================================================================
// Decision / RejectedDecision
// =============================================================================
//
// A record of what an agent wanted to do, annotated with the verdict that
// was reached: the action/reasoning/telemetry record the pipeline produces
// every cycle, plus the rejection record for anything the risk validator
// blocks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Close,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub agent_id: String,
    pub cycle_id: Uuid,
    pub action: Action,
    pub symbol: Option<String>,
    pub quantity_usd: Option<Decimal>,
    pub leverage: Option<u32>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub reasoning: String,
    pub confidence: Option<f64>,
    pub strategy: Option<String>,
    pub raw_model_text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
    pub cost_estimate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Validator {
    RiskValidator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedDecision {
    pub decision: Decision,
    pub rejection_reason: String,
    pub validator: Validator,
    pub market_snapshot_ref: Option<String>,
}

impl Decision {
    pub fn hold(agent_id: &str, cycle_id: Uuid, reasoning: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            cycle_id,
            action: Action::Hold,
            symbol: None,
            quantity_usd: None,
            leverage: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            reasoning: reasoning.into(),
            confidence: None,
            strategy: None,
            raw_model_text: String::new(),
            tokens_in: 0,
            tokens_out: 0,
            latency_ms: 0,
            cost_estimate: None,
            created_at: Utc::now(),
        }
    }

    pub fn reject(self, reason: impl Into<String>, validator: Validator) -> RejectedDecision {
        RejectedDecision {
            decision: self,
            rejection_reason: reason.into(),
            validator,
            market_snapshot_ref: None,
        }
    }
}
