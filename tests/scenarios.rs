// =============================================================================
// End-to-end scenario tests
// =============================================================================
//
// Exercises the execution/risk/reconcile/pipeline seams together through
// `MockVenue`/`MockModel`, wiring a fake exchange client and a fake model
// client against the real ledger and risk code. Each test is a distinct
// scenario rather than a round-trip grid.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use arena_engine::agent::AgentRegistry;
use arena_engine::config::{AgentConfig, Config, ProviderKind};
use arena_engine::decision::{Decision, RejectedDecision};
use arena_engine::events::EventBus;
use arena_engine::execution::{execute, ExecutionStatus};
use arena_engine::ledger::account::{AccountState, Trade};
use arena_engine::ledger::{Account, AccountRegistry, Position};
use arena_engine::market_snapshot::{Indicators, MarketSnapshot, SnapshotCache};
use arena_engine::model::providers::mock::MockModel;
use arena_engine::model::ModelClient;
use arena_engine::parsing::ParsedDecision;
use arena_engine::pipeline::{run_cycle, PipelineContext};
use arena_engine::reconcile::reconcile;
use arena_engine::risk::{self, RejectionReason};
use arena_engine::store::{LeaderboardRow, Store};
use arena_engine::venue::mock::MockVenue;
use arena_engine::venue::VenuePosition;

fn snapshot_at(symbol: &str, price: rust_decimal::Decimal) -> MarketSnapshot {
    MarketSnapshot {
        symbol: symbol.to_string(),
        price,
        bid: price,
        ask: price,
        volume_24h: dec!(1000),
        price_change_pct_24h: dec!(0),
        high_24h: price,
        low_24h: price,
        indicators: Indicators::default(),
        fetched_at: Utc::now(),
    }
}

fn buy_btc(quantity_usd: rust_decimal::Decimal) -> ParsedDecision {
    ParsedDecision {
        action: arena_engine::decision::Action::Buy,
        symbol: Some("BTCUSDT".into()),
        quantity_usd: Some(quantity_usd),
        leverage: Some(5),
        stop_loss_pct: Some(dec!(5)),
        take_profit_pct: Some(dec!(10)),
        reasoning: "momentum long".into(),
        confidence: Some(0.9),
        strategy: None,
    }
}

fn placeholder_decision() -> Decision {
    Decision::hold("a1", Uuid::new_v4(), "placeholder")
}

/// Scenario: a profitable LONG closes on its take-profit level.
#[tokio::test]
async fn long_position_closes_profitably_at_take_profit() {
    let venue = MockVenue::new();
    venue.set_price("BTCUSDT", dec!(100));
    let account = Account::new("a1", dec!(10000));
    let mut cfg = Config::default();
    cfg.symbols = vec!["BTCUSDT".into()];

    let decision = placeholder_decision();
    let opened = execute(
        &venue,
        &account,
        &decision,
        &buy_btc(dec!(1000)),
        Some(&snapshot_at("BTCUSDT", dec!(100))),
        &cfg,
        0.0,
    )
    .await;
    assert_eq!(opened.0.status, ExecutionStatus::Opened);

    let position = account.open_position_for_symbol("BTCUSDT").unwrap();
    assert_eq!(position.take_profit_price, Some(dec!(110)));

    // Price rallies past the take-profit level.
    venue.set_price("BTCUSDT", dec!(110));
    let triggers = account.evaluate_triggers(&HashMap::from([("BTCUSDT".to_string(), dec!(110))]));
    assert_eq!(triggers.len(), 1);

    let close = ParsedDecision {
        action: arena_engine::decision::Action::Close,
        symbol: Some("BTCUSDT".into()),
        quantity_usd: None,
        leverage: None,
        stop_loss_pct: None,
        take_profit_pct: None,
        reasoning: "take profit hit".into(),
        confidence: None,
        strategy: None,
    };
    let closed = execute(
        &venue,
        &account,
        &decision,
        &close,
        Some(&snapshot_at("BTCUSDT", dec!(110))),
        &cfg,
        0.0,
    )
    .await;
    assert_eq!(closed.0.status, ExecutionStatus::Closed);

    let snap = account.snapshot();
    assert_eq!(snap.trade_count, 1);
    assert_eq!(snap.win_count, 1);
    assert!(snap.balance > dec!(10000));
}

/// Scenario: a SHORT position takes a loss through its stop-loss level.
#[tokio::test]
async fn short_position_stops_out_at_a_loss() {
    let venue = MockVenue::new();
    venue.set_price("BTCUSDT", dec!(100));
    let account = Account::new("a1", dec!(10000));
    let mut cfg = Config::default();
    cfg.symbols = vec!["BTCUSDT".into()];

    let sell = ParsedDecision {
        action: arena_engine::decision::Action::Sell,
        symbol: Some("BTCUSDT".into()),
        quantity_usd: Some(dec!(1000)),
        leverage: Some(5),
        stop_loss_pct: Some(dec!(5)),
        take_profit_pct: Some(dec!(10)),
        reasoning: "fading the rally".into(),
        confidence: Some(0.7),
        strategy: None,
    };
    let decision = placeholder_decision();
    let opened = execute(
        &venue,
        &account,
        &decision,
        &sell,
        Some(&snapshot_at("BTCUSDT", dec!(100))),
        &cfg,
        0.0,
    )
    .await;
    assert_eq!(opened.0.status, ExecutionStatus::Opened);

    let position = account.open_position_for_symbol("BTCUSDT").unwrap();
    assert_eq!(position.stop_loss_price, Some(dec!(105)));

    // Price runs against the short, through the stop.
    venue.set_price("BTCUSDT", dec!(106));
    let triggers = account.evaluate_triggers(&HashMap::from([("BTCUSDT".to_string(), dec!(106))]));
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].1, arena_engine::ledger::ExitReason::StopLoss);

    let close = ParsedDecision {
        action: arena_engine::decision::Action::Close,
        symbol: Some("BTCUSDT".into()),
        quantity_usd: None,
        leverage: None,
        stop_loss_pct: None,
        take_profit_pct: None,
        reasoning: "stopped out".into(),
        confidence: None,
        strategy: None,
    };
    let closed = execute(
        &venue,
        &account,
        &decision,
        &close,
        Some(&snapshot_at("BTCUSDT", dec!(106))),
        &cfg,
        0.0,
    )
    .await;
    assert_eq!(closed.0.status, ExecutionStatus::Closed);

    let snap = account.snapshot();
    assert_eq!(snap.trade_count, 1);
    assert_eq!(snap.loss_count, 1);
    assert!(snap.balance < dec!(10000));
}

/// Scenario: the risk validator rejects a second BUY on a symbol that
/// already has an open position.
#[test]
fn risk_validator_rejects_duplicate_symbol() {
    let account = Account::new("a1", dec!(10000));
    account.open_position(arena_engine::ledger::OpenPositionParams {
        symbol: "BTCUSDT",
        side: arena_engine::ledger::Side::Long,
        quantity_usd: dec!(1000),
        leverage: 5,
        entry_price: dec!(100),
        sl_pct: Some(dec!(5)),
        tp_pct: Some(dec!(10)),
        max_open_positions: 5,
        max_leverage: 10,
        min_trade_size: dec!(10),
        max_trade_size: dec!(5000),
        one_per_symbol: true,
        client_order_id: "a1_BTCUSDT_1",
    })
    .unwrap();

    let mut cfg = Config::default();
    cfg.symbols = vec!["BTCUSDT".into()];
    let state = account.snapshot();
    let result = risk::validate(&buy_btc(dec!(500)), &state, Some(&snapshot_at("BTCUSDT", dec!(100))), &cfg);
    assert_eq!(result, Err(RejectionReason::DuplicateSymbol));
}

/// Scenario: a second agent's position open attempt is blocked once the
/// account is already at its configured max-open-positions ceiling.
#[test]
fn risk_validator_enforces_max_open_positions() {
    let account = Account::new("a1", dec!(100000));
    account.open_position(arena_engine::ledger::OpenPositionParams {
        symbol: "BTCUSDT",
        side: arena_engine::ledger::Side::Long,
        quantity_usd: dec!(1000),
        leverage: 5,
        entry_price: dec!(100),
        sl_pct: None,
        tp_pct: None,
        max_open_positions: 1,
        max_leverage: 10,
        min_trade_size: dec!(10),
        max_trade_size: dec!(5000),
        one_per_symbol: true,
        client_order_id: "a1_BTCUSDT_1",
    })
    .unwrap();

    let mut cfg = Config::default();
    cfg.symbols = vec!["BTCUSDT".into(), "ETHUSDT".into()];
    cfg.risk.max_open_positions = 1;
    let state = account.snapshot();
    let mut second = buy_btc(dec!(500));
    second.symbol = Some("ETHUSDT".into());
    let result = risk::validate(&second, &state, Some(&snapshot_at("ETHUSDT", dec!(100))), &cfg);
    assert_eq!(result, Err(RejectionReason::MaxPositionsReached));
}

/// Scenario: reconciliation adopts a venue position with no local
/// counterpart, tagged for an agent the account registry already knows.
#[tokio::test]
async fn reconciliation_adopts_an_orphan_venue_position() {
    let mut cfg = Config::default();
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

    let venue = MockVenue::new();
    venue.seed_open_position(VenuePosition {
        symbol: "SOLUSDT".into(),
        side: arena_engine::ledger::Side::Long,
        quantity: dec!(20),
        entry_price: dec!(150),
        leverage: 1,
        client_order_id: Some("a1_SOLUSDT_1700000000000".into()),
    });

    let report = reconcile(&venue, &accounts, &HashMap::new()).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.unowned, 0);
    let account = accounts.get("a1").unwrap();
    assert!(account.has_open_position("SOLUSDT"));
    assert_eq!(account.snapshot().margin_used, dec!(3000));
}

#[derive(Default)]
struct RecordingStore {
    decisions: Mutex<Vec<Decision>>,
    rejected: Mutex<Vec<RejectedDecision>>,
}

#[async_trait::async_trait]
impl Store for RecordingStore {
    async fn save_decision(&self, decision: &Decision) -> anyhow::Result<()> {
        self.decisions.lock().unwrap().push(decision.clone());
        Ok(())
    }
    async fn save_rejected_decision(&self, rejected: &RejectedDecision) -> anyhow::Result<()> {
        self.rejected.lock().unwrap().push(rejected.clone());
        Ok(())
    }
    async fn save_trade(&self, _trade: &Trade) -> anyhow::Result<()> {
        Ok(())
    }
    async fn upsert_account(&self, _display_name: &str, _state: &AccountState) -> anyhow::Result<()> {
        Ok(())
    }
    async fn upsert_position(&self, _position: &Position) -> anyhow::Result<()> {
        Ok(())
    }
    async fn delete_position(&self, _position_id: uuid::Uuid) -> anyhow::Result<()> {
        Ok(())
    }
    async fn save_market_snapshot(&self, _snapshot: &MarketSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
    async fn record_api_call(&self, _agent_id: &str, _provider: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn leaderboard(&self) -> anyhow::Result<Vec<LeaderboardRow>> {
        Ok(vec![])
    }
}

/// Scenario: a model's decision is recorded as rejected and no position is
/// opened, with the full cycle otherwise running to completion.
#[tokio::test]
async fn model_rejection_is_recorded_with_no_trade() {
    let mut cfg = Config::default();
    cfg.symbols = vec!["BTCUSDT".into()];
    cfg.rejection_sample_rate = 1.0;
    cfg.agents.push(AgentConfig {
        id: "a1".into(),
        display_name: "Agent One".into(),
        provider: ProviderKind::Anthropic,
        model: "claude".into(),
        system_prompt: None,
        starting_balance: dec!(10000),
    });

    let agents = Arc::new(AgentRegistry::from_config(&cfg));
    let accounts = Arc::new(AccountRegistry::from_agents(
        &agents,
        &HashMap::from([("a1".to_string(), dec!(10000))]),
    ));

    let venue = Arc::new(MockVenue::new());
    venue.set_price("BTCUSDT", dec!(100));

    let mut models: HashMap<String, Arc<dyn ModelClient>> = HashMap::new();
    // Quantity below the configured min trade size trips the risk
    // validator's InvalidSize check, independent of model intent.
    models.insert(
        "a1".to_string(),
        Arc::new(MockModel::new(
            r#"{"action": "BUY", "symbol": "BTCUSDT", "quantityUsd": 1, "leverage": 5, "reasoning": "too small to matter"}"#,
        )),
    );

    let snapshots = Arc::new(SnapshotCache::new(
        venue.clone(),
        std::time::Duration::from_secs(60),
        cfg.indicator_interval.clone(),
        cfg.indicator_lookback,
    ));
    let recording_store = Arc::new(RecordingStore::default());
    let store: Arc<dyn Store> = recording_store.clone();
    let events = Arc::new(EventBus::new());

    let ctx = Arc::new(PipelineContext {
        agents,
        accounts: accounts.clone(),
        models,
        venue,
        snapshots,
        store,
        events,
        config: cfg,
    });

    let summary = run_cycle(ctx, CancellationToken::new()).await;
    assert_eq!(summary.agents_run, 1);

    assert_eq!(recording_store.decisions.lock().unwrap().len(), 1);
    assert_eq!(recording_store.rejected.lock().unwrap().len(), 1);
    assert!(accounts.get("a1").unwrap().open_position_for_symbol("BTCUSDT").is_none());
    assert_eq!(accounts.get("a1").unwrap().snapshot().trade_count, 0);
}
