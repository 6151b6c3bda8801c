// =============================================================================
// Decision pipeline
// =============================================================================
//
// One pass through this module is one (cycle, agent) state machine: assemble
// context, call the agent's model, parse its reply, validate and execute the
// decision, then persist and publish whatever happened. Agents run
// concurrently within a cycle as a `JoinSet`, one task per agent, all sharing
// the cycle's `CancellationToken`. A failure isolated to one agent (model
// error, parse error) never aborts the others — each agent's outcome is
// independent. A cancelled cycle aborts every still-running agent task.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::AgentRegistry;
use crate::config::Config;
use crate::decision::{Action, Decision};
use crate::events::{CycleSummary, Event, EventBus};
use crate::execution::{self, ExecutionStatus};
use crate::ledger::AccountRegistry;
use crate::market_snapshot::SnapshotCache;
use crate::model::{ModelClient, ModelReply};
use crate::parsing::{self, ParsedDecision};
use crate::store::Store;
use crate::venue::VenueClient;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentOutcome {
    Executed,
    Rejected,
    ParseFailed,
    ModelFailed,
}

/// Everything a single cycle needs, bundled so each spawned agent task can
/// clone an `Arc` of the whole thing rather than threading ten parameters.
pub struct PipelineContext {
    pub agents: Arc<AgentRegistry>,
    pub accounts: Arc<AccountRegistry>,
    pub models: HashMap<String, Arc<dyn ModelClient>>,
    pub venue: Arc<dyn VenueClient>,
    pub snapshots: Arc<SnapshotCache>,
    pub store: Arc<dyn Store>,
    pub events: Arc<EventBus>,
    pub config: Config,
}

/// Runs one full cycle: every enabled agent gets a concurrent decision task,
/// the cycle waits for all of them, and a `CycleCompleted` event is published
/// with the aggregate outcome. Returns the summary for the scheduler's
/// status counters. `token` is the cycle's own cancellation token — cancelling
/// it aborts every outstanding agent task and, through each agent's model
/// call, every in-flight model request.
pub async fn run_cycle(ctx: Arc<PipelineContext>, token: CancellationToken) -> CycleSummary {
    let cycle_id = Uuid::new_v4();
    let started = std::time::Instant::now();
    ctx.events.publish(Event::CycleStarted { cycle_id });
    info!(%cycle_id, "cycle started");

    let snapshots = ctx.snapshots.snapshot(&ctx.config.symbols).await;
    let prices: HashMap<String, Decimal> = snapshots.iter().map(|(s, v)| (s.clone(), v.price)).collect();

    match crate::reconcile::reconcile(ctx.venue.as_ref(), &ctx.accounts, &prices).await {
        Ok(report) => info!(
            %cycle_id,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            unowned = report.unowned,
            "reconcile pass complete"
        ),
        Err(e) => {
            warn!(%cycle_id, error = %e, "reconcile pass aborted, venue fetch failed");
            ctx.events.publish(Event::SystemError {
                message: format!("reconcile failed: {e}"),
            });
        }
    }

    apply_triggers(&ctx, &prices).await;

    let mut join_set: JoinSet<anyhow::Result<AgentOutcome>> = JoinSet::new();
    let mut agents_run = 0usize;
    for agent in ctx.agents.iter() {
        if ctx
            .accounts
            .get(&agent.id)
            .map(|a| !a.snapshot().enabled)
            .unwrap_or(true)
        {
            continue;
        }
        let ctx = ctx.clone();
        let agent_id = agent.id.clone();
        let snapshots = snapshots.clone();
        let token = token.clone();
        agents_run += 1;
        join_set.spawn(async move {
            run_agent(&ctx, &agent_id, cycle_id, &snapshots, &token).await
        });
    }

    let mut errors = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled(), if !join_set.is_empty() => {
                warn!(%cycle_id, "cycle cancelled, aborting outstanding agent tasks");
                join_set.abort_all();
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok(Ok(_outcome)) => {}
                        Ok(Err(e)) => {
                            errors += 1;
                            warn!(%cycle_id, error = %e, "agent decision task failed");
                        }
                        Err(join_err) => {
                            errors += 1;
                            warn!(%cycle_id, error = %join_err, "agent decision task cancelled by cycle deadline");
                        }
                    }
                }
                break;
            }
            joined = join_set.join_next() => {
                match joined {
                    None => break,
                    Some(Ok(Ok(_outcome))) => {}
                    Some(Ok(Err(e))) => {
                        errors += 1;
                        warn!(%cycle_id, error = %e, "agent decision task failed");
                        ctx.events.publish(Event::SystemError {
                            message: e.to_string(),
                        });
                    }
                    Some(Err(join_err)) => {
                        errors += 1;
                        warn!(%cycle_id, error = %join_err, "agent decision task panicked");
                    }
                }
            }
        }
    }

    for (_, account) in ctx.accounts.iter() {
        account.mark_to_market(&prices);
    }

    for (symbol, snapshot) in &snapshots {
        let _ = symbol;
        let _ = ctx.store.save_market_snapshot(snapshot).await;
    }
    for (agent_id, account) in ctx.accounts.iter() {
        let agent = ctx.agents.get(agent_id);
        let display_name = agent.map(|a| a.display_name.as_str()).unwrap_or(agent_id);
        let _ = ctx.store.upsert_account(display_name, &account.snapshot()).await;
    }

    let summary = CycleSummary {
        cycle_id,
        duration_ms: started.elapsed().as_millis() as u64,
        agents_run,
        errors,
    };
    ctx.events.publish(Event::CycleCompleted {
        summary: summary.clone(),
    });
    info!(%cycle_id, duration_ms = summary.duration_ms, agents_run, errors, "cycle completed");
    summary
}

/// Evaluates and applies stop-loss/take-profit triggers for every account
/// against the freshly refreshed snapshot prices, ahead of running any
/// agent's own decision for this cycle.
async fn apply_triggers(ctx: &PipelineContext, prices: &HashMap<String, Decimal>) {
    for (agent_id, account) in ctx.accounts.iter() {
        for (position_id, reason) in account.evaluate_triggers(prices) {
            let Some(price) = account
                .snapshot()
                .positions
                .iter()
                .find(|p| p.id == position_id)
                .and_then(|p| prices.get(&p.symbol).copied())
            else {
                continue;
            };
            if let Some(trade) = account.close_position(position_id, price, reason) {
                info!(agent_id, %position_id, reason = ?reason, pnl = %trade.realised_pnl, "trigger closed position");
                let _ = ctx.store.save_trade(&trade).await;
                ctx.events.publish(Event::PositionClosed { trade });
                ctx.events.publish(Event::AccountUpdated {
                    agent_id: agent_id.clone(),
                });
            }
        }
    }
}

async fn run_agent(
    ctx: &PipelineContext,
    agent_id: &str,
    cycle_id: Uuid,
    snapshots: &HashMap<String, crate::market_snapshot::MarketSnapshot>,
    token: &CancellationToken,
) -> anyhow::Result<AgentOutcome> {
    let agent = ctx
        .agents
        .get(agent_id)
        .ok_or_else(|| anyhow::anyhow!("agent {agent_id} missing from registry"))?;
    let account = ctx
        .accounts
        .get(agent_id)
        .ok_or_else(|| anyhow::anyhow!("account {agent_id} missing from registry"))?;
    let model = ctx
        .models
        .get(agent_id)
        .ok_or_else(|| anyhow::anyhow!("no model client configured for agent {agent_id}"))?;

    let user_prompt = build_user_prompt(agent_id, account, snapshots);

    let reply = match model
        .decide(token, &agent.system_prompt, &user_prompt)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            warn!(agent_id, error = %e, "model call failed");
            ctx.events.publish(Event::SystemError {
                message: format!("{agent_id}: model call failed: {e}"),
            });
            return Ok(AgentOutcome::ModelFailed);
        }
    };

    let parsed = match parsing::extract_decision_json(&reply.text) {
        Ok(p) => p,
        Err(e) => {
            warn!(agent_id, error = %e, "model reply did not parse as a decision");
            let decision = decision_from_reply(agent_id, cycle_id, &reply, Action::Hold, None);
            let rejected = decision.reject(e.to_string(), crate::decision::Validator::RiskValidator);
            let _ = ctx.store.save_rejected_decision(&rejected).await;
            ctx.events.publish(Event::AgentDecisionRejected { rejected });
            return Ok(AgentOutcome::ParseFailed);
        }
    };

    account.record_decision();
    let decision = decision_from_reply(agent_id, cycle_id, &reply, parsed.action, Some(&parsed));
    let snapshot = parsed.symbol.as_deref().and_then(|s| snapshots.get(s));

    let (result, rejected) = execution::execute(
        ctx.venue.as_ref(),
        account,
        &decision,
        &parsed,
        snapshot,
        &ctx.config,
        ctx.config.rejection_sample_rate,
    )
    .await;

    let _ = ctx.store.save_decision(&decision).await;
    ctx.events.publish(Event::AgentDecision {
        decision: decision.clone(),
        outcome: format!("{:?}", result.status),
    });
    if let Some(rejected) = rejected {
        let _ = ctx.store.save_rejected_decision(&rejected).await;
        ctx.events.publish(Event::AgentDecisionRejected { rejected });
    }
    if result.status == ExecutionStatus::Opened {
        if let Some(position) = result.position.clone() {
            let _ = ctx.store.upsert_position(&position).await;
            ctx.events.publish(Event::PositionOpened { position });
        }
    }

    let _ = ctx.store.upsert_account(&agent.display_name, &account.snapshot()).await;
    ctx.events.publish(Event::AccountUpdated {
        agent_id: agent_id.to_string(),
    });

    match result.status {
        ExecutionStatus::Opened | ExecutionStatus::Closed | ExecutionStatus::Held => {
            Ok(AgentOutcome::Executed)
        }
        ExecutionStatus::Rejected | ExecutionStatus::Failed => Ok(AgentOutcome::Rejected),
    }
}

fn decision_from_reply(
    agent_id: &str,
    cycle_id: Uuid,
    reply: &ModelReply,
    action: Action,
    parsed: Option<&ParsedDecision>,
) -> Decision {
    Decision {
        id: Uuid::new_v4(),
        agent_id: agent_id.to_string(),
        cycle_id,
        action,
        symbol: parsed.and_then(|p| p.symbol.clone()),
        quantity_usd: parsed.and_then(|p| p.quantity_usd),
        leverage: parsed.and_then(|p| p.leverage),
        stop_loss_pct: parsed.and_then(|p| p.stop_loss_pct),
        take_profit_pct: parsed.and_then(|p| p.take_profit_pct),
        reasoning: parsed.map(|p| p.reasoning.clone()).unwrap_or_default(),
        confidence: parsed.and_then(|p| p.confidence),
        strategy: parsed.and_then(|p| p.strategy.clone()),
        raw_model_text: reply.text.clone(),
        tokens_in: reply.tokens_in,
        tokens_out: reply.tokens_out,
        latency_ms: reply.latency_ms,
        cost_estimate: None,
        created_at: chrono::Utc::now(),
    }
}

fn build_user_prompt(
    agent_id: &str,
    account: &crate::ledger::Account,
    snapshots: &HashMap<String, crate::market_snapshot::MarketSnapshot>,
) -> String {
    let state = account.snapshot();
    let positions_json = serde_json::to_string(&state.positions).unwrap_or_default();
    let market_json = serde_json::to_string(&snapshots).unwrap_or_default();
    format!(
        "You are agent {agent_id}. Account equity: {}. Balance: {}. \
         Open positions: {positions_json}. Market snapshots: {market_json}. \
         Respond with a single JSON object: \
         {{\"action\": \"BUY|SELL|CLOSE|HOLD\", \"symbol\": \"...\", \
         \"quantityUsd\": ..., \"leverage\": ..., \"stopLossPct\": ..., \
         \"takeProfitPct\": ..., \"reasoning\": \"...\"}}",
        state.equity(),
        state.balance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, ProviderKind};
    use crate::model::providers::mock::MockModel;
    use crate::venue::mock::MockVenue;
    use rust_decimal_macros::dec;

    fn test_context(reply_text: &str) -> Arc<PipelineContext> {
        let mut cfg = Config::default();
        cfg.symbols = vec!["BTCUSDT".to_string()];
        cfg.agents.push(AgentConfig {
            id: "a1".into(),
            display_name: "Agent One".into(),
            provider: ProviderKind::Anthropic,
            model: "claude".into(),
            system_prompt: None,
            starting_balance: dec!(10000),
        });
        let agents = AgentRegistry::from_config(&cfg);
        let accounts = AccountRegistry::from_agents(&agents, &HashMap::new());

        let venue = Arc::new(MockVenue::new());
        venue.set_price("BTCUSDT", dec!(100));

        let mut models: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
        models.insert("a1".into(), Arc::new(MockModel::new(reply_text)));

        Arc::new(PipelineContext {
            agents: Arc::new(agents),
            accounts: Arc::new(accounts),
            models,
            venue: venue.clone(),
            snapshots: Arc::new(SnapshotCache::new(
                venue,
                std::time::Duration::from_secs(60),
                "1h".into(),
                10,
            )),
            store: Arc::new(NullStore),
            events: Arc::new(EventBus::new()),
            config: cfg,
        })
    }

    /// Discards every write. Exercises the pipeline without a real backing
    /// database.
    struct NullStore;

    #[async_trait::async_trait]
    impl Store for NullStore {
        async fn save_decision(&self, _decision: &Decision) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_rejected_decision(
            &self,
            _rejected: &crate::decision::RejectedDecision,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_trade(&self, _trade: &crate::ledger::Trade) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_account(
            &self,
            _display_name: &str,
            _state: &crate::ledger::AccountState,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_position(&self, _position: &crate::ledger::Position) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_position(&self, _position_id: uuid::Uuid) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_market_snapshot(
            &self,
            _snapshot: &crate::market_snapshot::MarketSnapshot,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn record_api_call(&self, _agent_id: &str, _provider: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn leaderboard(&self) -> anyhow::Result<Vec<crate::store::LeaderboardRow>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn hold_reply_executes_as_held() {
        let ctx = test_context(r#"{"action": "HOLD", "reasoning": "waiting"}"#);
        let summary = run_cycle(ctx, CancellationToken::new()).await;
        assert_eq!(summary.agents_run, 1);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn unparseable_reply_counts_as_no_trade() {
        let ctx = test_context("I am not sure what to do today.");
        let summary = run_cycle(ctx, CancellationToken::new()).await;
        assert_eq!(summary.agents_run, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(ctx.accounts.get("a1").unwrap().open_position_count(), 0);
    }
}
