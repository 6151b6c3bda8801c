// =============================================================================
// Cycle scheduler
// =============================================================================
//
// Periodic, non-overlapping, cancellable driver: a single `Scheduler` value
// with atomic counters and one `running` flag, never exposed directly —
// status goes out through `status()`, an immutable snapshot. A command
// channel carries `TriggerNow`/`Pause`/`Resume`/`Shutdown` from the API
// layer into the scheduler's own task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::{self, PipelineContext};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LastOutcome {
    Unknown,
    Completed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub paused: bool,
    pub total_runs: u64,
    pub total_errors: u64,
    pub last_duration_ms: u64,
    pub last_outcome: LastOutcome,
    pub next_run_at: Option<DateTime<Utc>>,
}

enum Command {
    TriggerNow,
    Pause,
    Resume,
    Shutdown,
}

#[derive(Debug)]
pub enum ControlError {
    AlreadyRunning,
    AlreadyPaused,
    AlreadyResumed,
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::AlreadyRunning => write!(f, "a cycle is already running"),
            ControlError::AlreadyPaused => write!(f, "scheduler is already paused"),
            ControlError::AlreadyResumed => write!(f, "scheduler is not paused"),
        }
    }
}

struct Counters {
    running: AtomicBool,
    paused: AtomicBool,
    total_runs: AtomicU64,
    total_errors: AtomicU64,
    last_duration_ms: AtomicU64,
    last_outcome: parking_lot::RwLock<LastOutcome>,
    next_run_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            total_runs: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            last_duration_ms: AtomicU64::new(0),
            last_outcome: parking_lot::RwLock::new(LastOutcome::Unknown),
            next_run_at: parking_lot::RwLock::new(None),
        }
    }
}

/// Handle held by the API layer: cheap to clone, sends commands into the
/// scheduler's own task and reads the immutable status snapshot.
#[derive(Clone)]
pub struct Scheduler {
    counters: Arc<Counters>,
    commands: mpsc::Sender<Command>,
}

const MISSED_TICK_GRACE_SECS: u64 = 30;

impl Scheduler {
    /// Spawns the scheduler's own task and returns a handle. `period` is the
    /// tick interval; a cycle deadline of `period` minus 10s slack cancels
    /// outstanding model/venue calls so a stuck cycle cannot run forever.
    pub fn spawn(ctx: Arc<PipelineContext>, period: Duration) -> Self {
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel(16);

        let counters_for_task = counters.clone();
        tokio::spawn(run(ctx, period, counters_for_task, rx));

        Self {
            counters,
            commands: tx,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.counters.running.load(Ordering::Relaxed),
            paused: self.counters.paused.load(Ordering::Relaxed),
            total_runs: self.counters.total_runs.load(Ordering::Relaxed),
            total_errors: self.counters.total_errors.load(Ordering::Relaxed),
            last_duration_ms: self.counters.last_duration_ms.load(Ordering::Relaxed),
            last_outcome: *self.counters.last_outcome.read(),
            next_run_at: *self.counters.next_run_at.read(),
        }
    }

    pub async fn trigger_now(&self) -> Result<(), ControlError> {
        if self.counters.running.load(Ordering::Relaxed) {
            return Err(ControlError::AlreadyRunning);
        }
        let _ = self.commands.send(Command::TriggerNow).await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        if self.counters.paused.load(Ordering::Relaxed) {
            return Err(ControlError::AlreadyPaused);
        }
        let _ = self.commands.send(Command::Pause).await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        if !self.counters.paused.load(Ordering::Relaxed) {
            return Err(ControlError::AlreadyResumed);
        }
        let _ = self.commands.send(Command::Resume).await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// The scheduler's own task: a ticker plus a command inbox, selected
/// together. `MissedTickBehavior::Delay` coalesces a backlog of missed ticks
/// into a single catch-up tick rather than stacking cycles; the grace period
/// named in the contract is informational here (logged, not separately
/// timed) since `Delay` already collapses the backlog to one.
async fn run(
    ctx: Arc<PipelineContext>,
    period: Duration,
    counters: Arc<Counters>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    *counters.next_run_at.write() = Some(Utc::now() + chrono::Duration::from_std(period).unwrap_or_default());
    info!(
        period_secs = period.as_secs(),
        missed_tick_grace_secs = MISSED_TICK_GRACE_SECS,
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if counters.paused.load(Ordering::Relaxed) {
                    info!("scheduler tick skipped: paused");
                    continue;
                }
                run_one_cycle(&ctx, &counters, period).await;
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::TriggerNow) => {
                        run_one_cycle(&ctx, &counters, period).await;
                    }
                    Some(Command::Pause) => {
                        counters.paused.store(true, Ordering::Relaxed);
                        info!("scheduler paused");
                    }
                    Some(Command::Resume) => {
                        counters.paused.store(false, Ordering::Relaxed);
                        info!("scheduler resumed");
                    }
                    Some(Command::Shutdown) | None => {
                        info!("scheduler shutting down");
                        ctx.events.shutdown();
                        break;
                    }
                }
            }
        }
    }
}

async fn run_one_cycle(ctx: &Arc<PipelineContext>, counters: &Arc<Counters>, period: Duration) {
    if counters
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        warn!("cycle skipped: previous cycle still running");
        *counters.last_outcome.write() = LastOutcome::Skipped;
        return;
    }

    let deadline = period.saturating_sub(Duration::from_secs(10));
    let token = CancellationToken::new();
    let guard = token.clone();

    let mut cycle = Box::pin(pipeline::run_cycle(ctx.clone(), token));

    let (summary, deadline_exceeded) = tokio::select! {
        summary = &mut cycle => (summary, false),
        _ = tokio::time::sleep(deadline) => {
            warn!("cycle deadline exceeded, cancelling outstanding model/venue calls");
            guard.cancel();
            (cycle.await, true)
        }
    };

    counters.total_runs.fetch_add(1, Ordering::Relaxed);
    counters
        .total_errors
        .fetch_add(summary.errors as u64, Ordering::Relaxed);
    counters
        .last_duration_ms
        .store(summary.duration_ms, Ordering::Relaxed);
    *counters.last_outcome.write() = if deadline_exceeded {
        LastOutcome::Error
    } else {
        LastOutcome::Completed
    };

    *counters.next_run_at.write() =
        Some(Utc::now() + chrono::Duration::from_std(period).unwrap_or_default());
    counters.running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::ledger::AccountRegistry;
    use crate::market_snapshot::SnapshotCache;
    use crate::venue::mock::MockVenue;
    use std::collections::HashMap;

    fn test_ctx() -> Arc<PipelineContext> {
        let cfg = Config::default();
        let agents = AgentRegistry::from_config(&cfg);
        let accounts = AccountRegistry::from_agents(&agents, &HashMap::new());
        let venue = Arc::new(MockVenue::new());
        Arc::new(PipelineContext {
            agents: Arc::new(agents),
            accounts: Arc::new(accounts),
            models: HashMap::new(),
            venue: venue.clone(),
            snapshots: Arc::new(SnapshotCache::new(
                venue,
                Duration::from_secs(60),
                "1h".into(),
                10,
            )),
            store: Arc::new(NullStore),
            events: Arc::new(EventBus::new()),
            config: cfg,
        })
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl crate::store::Store for NullStore {
        async fn save_decision(&self, _d: &crate::decision::Decision) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_rejected_decision(
            &self,
            _r: &crate::decision::RejectedDecision,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_trade(&self, _t: &crate::ledger::Trade) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_account(
            &self,
            _d: &str,
            _s: &crate::ledger::AccountState,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_position(&self, _p: &crate::ledger::Position) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_position(&self, _id: uuid::Uuid) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_market_snapshot(
            &self,
            _s: &crate::market_snapshot::MarketSnapshot,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn record_api_call(&self, _a: &str, _p: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn leaderboard(&self) -> anyhow::Result<Vec<crate::store::LeaderboardRow>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn trigger_now_runs_a_cycle_and_updates_counters() {
        let scheduler = Scheduler::spawn(test_ctx(), Duration::from_secs(3600));
        scheduler.trigger_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = scheduler.status();
        assert_eq!(status.total_runs, 1);
        assert_eq!(status.last_outcome, LastOutcome::Completed);
    }

    #[tokio::test]
    async fn pause_then_resume_roundtrips() {
        let scheduler = Scheduler::spawn(test_ctx(), Duration::from_secs(3600));
        scheduler.pause().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.status().paused);
        assert!(matches!(scheduler.pause().await, Err(ControlError::AlreadyPaused)));

        scheduler.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!scheduler.status().paused);
        assert!(matches!(scheduler.resume().await, Err(ControlError::AlreadyResumed)));
    }
}
