// =============================================================================
// Durable store
// =============================================================================
//
// Narrow CRUD over the entities of the data model, plus a read-only
// leaderboard view and a snapshot insert. The core treats the store as a
// best-effort sink — it is never the source of truth for a running cycle,
// only its audit trail — so every write here is retried once with a short
// backoff and, on a second failure, logged rather than propagated, matching
// the transient-failure tolerance the contract calls for.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decision::{Decision, RejectedDecision};
use crate::ledger::account::{AccountState, Trade};
use crate::ledger::Position;
use crate::market_snapshot::MarketSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub agent_id: String,
    pub display_name: String,
    pub equity: Decimal,
    pub realised_pnl: Decimal,
    pub unrealised_pnl: Decimal,
    pub trade_count: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub as_of: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_decision(&self, decision: &Decision) -> anyhow::Result<()>;
    async fn save_rejected_decision(&self, rejected: &RejectedDecision) -> anyhow::Result<()>;
    async fn save_trade(&self, trade: &Trade) -> anyhow::Result<()>;
    async fn upsert_account(&self, display_name: &str, state: &AccountState) -> anyhow::Result<()>;
    async fn upsert_position(&self, position: &Position) -> anyhow::Result<()>;
    async fn delete_position(&self, position_id: uuid::Uuid) -> anyhow::Result<()>;
    async fn save_market_snapshot(&self, snapshot: &MarketSnapshot) -> anyhow::Result<()>;
    async fn record_api_call(&self, agent_id: &str, provider: &str) -> anyhow::Result<()>;
    async fn leaderboard(&self) -> anyhow::Result<Vec<LeaderboardRow>>;
}

/// Runs `op` once, and on failure retries it a single time after a short
/// backoff. Used by `Store` implementations to honour the "retry once, then
/// log" contract uniformly rather than re-implementing it at each call site.
pub async fn retry_once<F, Fut, T>(op: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(first_err) => {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            op().await.map_err(|second_err| {
                anyhow::anyhow!("store op failed twice: first={first_err}, second={second_err}")
            })
        }
    }
}
