// =============================================================================
// SQLite-backed store
// =============================================================================
//
// Inline `CREATE TABLE IF NOT EXISTS` at pool setup, `sqlx::query!`-free
// (compile-time verification isn't available without a live database at
// build time, so this uses the dynamic `query`/`query_as` API) — grounded on
// the sqlx usage in `other_examples/8e717ccc_N0tT1m-invest-iq`'s state
// manager and risk manager, which run their own ad-hoc `CREATE TABLE IF NOT
// EXISTS` migrations the same way at startup rather than through a separate
// migration runner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::warn;

use super::{retry_once, LeaderboardRow, Store};
use crate::decision::{Decision, RejectedDecision};
use crate::ledger::account::{AccountState, Trade};
use crate::ledger::{Position, PositionStatus, Side};
use crate::market_snapshot::MarketSnapshot;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite://{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                agent_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                balance TEXT NOT NULL,
                margin_used TEXT NOT NULL,
                realised_pnl TEXT NOT NULL,
                unrealised_pnl TEXT NOT NULL,
                trade_count INTEGER NOT NULL,
                win_count INTEGER NOT NULL,
                loss_count INTEGER NOT NULL,
                enabled INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                margin_used TEXT NOT NULL,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                venue_client_order_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_agent ON positions(agent_id);

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                position_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                realised_pnl TEXT NOT NULL,
                pnl_pct TEXT NOT NULL,
                exit_reason TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_agent ON trades(agent_id);

            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                cycle_id TEXT NOT NULL,
                action TEXT NOT NULL,
                symbol TEXT,
                reasoning TEXT NOT NULL,
                tokens_in INTEGER NOT NULL,
                tokens_out INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rejected_decisions (
                decision_id TEXT PRIMARY KEY,
                rejection_reason TEXT NOT NULL,
                validator TEXT NOT NULL,
                market_snapshot_ref TEXT
            );

            CREATE TABLE IF NOT EXISTS market_snapshots (
                symbol TEXT NOT NULL,
                price TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                PRIMARY KEY (symbol, fetched_at)
            );

            CREATE TABLE IF NOT EXISTS api_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                called_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Long => "LONG",
        Side::Short => "SHORT",
    }
}

fn status_to_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Open => "OPEN",
        PositionStatus::Closed => "CLOSED",
        PositionStatus::Liquidated => "LIQUIDATED",
    }
}

fn decimal_to_str(d: Decimal) -> String {
    d.to_string()
}

fn row_to_leaderboard(row: SqliteRow) -> anyhow::Result<LeaderboardRow> {
    let balance: String = row.try_get("balance")?;
    let realised_pnl: String = row.try_get("realised_pnl")?;
    let unrealised_pnl: String = row.try_get("unrealised_pnl")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(LeaderboardRow {
        agent_id: row.try_get("agent_id")?,
        display_name: row.try_get("display_name")?,
        equity: Decimal::from_str(&balance)? + Decimal::from_str(&unrealised_pnl)?,
        realised_pnl: Decimal::from_str(&realised_pnl)?,
        unrealised_pnl: Decimal::from_str(&unrealised_pnl)?,
        trade_count: row.try_get::<i64, _>("trade_count")? as u64,
        win_count: row.try_get::<i64, _>("win_count")? as u64,
        loss_count: row.try_get::<i64, _>("loss_count")? as u64,
        as_of: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_decision(&self, decision: &Decision) -> anyhow::Result<()> {
        let decision = decision.clone();
        retry_once(|| {
            let pool = self.pool.clone();
            let decision = decision.clone();
            async move {
                sqlx::query(
                    "INSERT OR REPLACE INTO decisions
                     (id, agent_id, cycle_id, action, symbol, reasoning, tokens_in, tokens_out, latency_ms, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(decision.id.to_string())
                .bind(&decision.agent_id)
                .bind(decision.cycle_id.to_string())
                .bind(format!("{:?}", decision.action).to_uppercase())
                .bind(&decision.symbol)
                .bind(&decision.reasoning)
                .bind(decision.tokens_in as i64)
                .bind(decision.tokens_out as i64)
                .bind(decision.latency_ms as i64)
                .bind(decision.created_at.to_rfc3339())
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn save_rejected_decision(&self, rejected: &RejectedDecision) -> anyhow::Result<()> {
        self.save_decision(&rejected.decision).await?;
        let rejected = rejected.clone();
        retry_once(|| {
            let pool = self.pool.clone();
            let rejected = rejected.clone();
            async move {
                sqlx::query(
                    "INSERT OR REPLACE INTO rejected_decisions
                     (decision_id, rejection_reason, validator, market_snapshot_ref)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(rejected.decision.id.to_string())
                .bind(&rejected.rejection_reason)
                .bind(format!("{:?}", rejected.validator))
                .bind(&rejected.market_snapshot_ref)
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn save_trade(&self, trade: &Trade) -> anyhow::Result<()> {
        let trade = trade.clone();
        retry_once(|| {
            let pool = self.pool.clone();
            let trade = trade.clone();
            async move {
                sqlx::query(
                    "INSERT OR REPLACE INTO trades
                     (id, agent_id, position_id, symbol, side, entry_price, exit_price, quantity,
                      leverage, realised_pnl, pnl_pct, exit_reason, opened_at, closed_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(trade.id.to_string())
                .bind(&trade.agent_id)
                .bind(trade.position_id.to_string())
                .bind(&trade.symbol)
                .bind(side_to_str(trade.side))
                .bind(decimal_to_str(trade.entry_price))
                .bind(decimal_to_str(trade.exit_price))
                .bind(decimal_to_str(trade.quantity))
                .bind(trade.leverage as i64)
                .bind(decimal_to_str(trade.realised_pnl))
                .bind(decimal_to_str(trade.pnl_pct))
                .bind(format!("{:?}", trade.exit_reason).to_uppercase())
                .bind(trade.opened_at.to_rfc3339())
                .bind(trade.closed_at.to_rfc3339())
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn upsert_account(&self, display_name: &str, state: &AccountState) -> anyhow::Result<()> {
        let state = state.clone();
        let display_name = display_name.to_string();
        retry_once(|| {
            let pool = self.pool.clone();
            let state = state.clone();
            let display_name = display_name.clone();
            async move {
                sqlx::query(
                    "INSERT INTO accounts
                     (agent_id, display_name, balance, margin_used, realised_pnl, unrealised_pnl,
                      trade_count, win_count, loss_count, enabled, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(agent_id) DO UPDATE SET
                       display_name = excluded.display_name,
                       balance = excluded.balance,
                       margin_used = excluded.margin_used,
                       realised_pnl = excluded.realised_pnl,
                       unrealised_pnl = excluded.unrealised_pnl,
                       trade_count = excluded.trade_count,
                       win_count = excluded.win_count,
                       loss_count = excluded.loss_count,
                       enabled = excluded.enabled,
                       updated_at = excluded.updated_at",
                )
                .bind(&state.agent_id)
                .bind(&display_name)
                .bind(decimal_to_str(state.balance))
                .bind(decimal_to_str(state.margin_used))
                .bind(decimal_to_str(state.realised_pnl))
                .bind(decimal_to_str(state.unrealised_pnl))
                .bind(state.trade_count as i64)
                .bind(state.win_count as i64)
                .bind(state.loss_count as i64)
                .bind(state.enabled as i64)
                .bind(Utc::now().to_rfc3339())
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn upsert_position(&self, position: &Position) -> anyhow::Result<()> {
        let position = position.clone();
        retry_once(|| {
            let pool = self.pool.clone();
            let position = position.clone();
            async move {
                sqlx::query(
                    "INSERT INTO positions
                     (id, agent_id, symbol, side, entry_price, quantity, leverage, margin_used,
                      status, opened_at, venue_client_order_id)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                       entry_price = excluded.entry_price,
                       quantity = excluded.quantity,
                       margin_used = excluded.margin_used,
                       status = excluded.status",
                )
                .bind(position.id.to_string())
                .bind(&position.agent_id)
                .bind(&position.symbol)
                .bind(side_to_str(position.side))
                .bind(decimal_to_str(position.entry_price))
                .bind(decimal_to_str(position.quantity))
                .bind(position.leverage as i64)
                .bind(decimal_to_str(position.margin_used))
                .bind(status_to_str(position.status))
                .bind(position.opened_at.to_rfc3339())
                .bind(&position.venue_client_order_id)
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn delete_position(&self, position_id: uuid::Uuid) -> anyhow::Result<()> {
        retry_once(|| {
            let pool = self.pool.clone();
            async move {
                sqlx::query("DELETE FROM positions WHERE id = ?")
                    .bind(position_id.to_string())
                    .execute(&pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    async fn save_market_snapshot(&self, snapshot: &MarketSnapshot) -> anyhow::Result<()> {
        let snapshot = snapshot.clone();
        retry_once(|| {
            let pool = self.pool.clone();
            let snapshot = snapshot.clone();
            async move {
                sqlx::query(
                    "INSERT OR REPLACE INTO market_snapshots (symbol, price, fetched_at)
                     VALUES (?, ?, ?)",
                )
                .bind(&snapshot.symbol)
                .bind(decimal_to_str(snapshot.price))
                .bind(snapshot.fetched_at.to_rfc3339())
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn record_api_call(&self, agent_id: &str, provider: &str) -> anyhow::Result<()> {
        let agent_id = agent_id.to_string();
        let provider = provider.to_string();
        retry_once(|| {
            let pool = self.pool.clone();
            let agent_id = agent_id.clone();
            let provider = provider.clone();
            async move {
                sqlx::query(
                    "INSERT INTO api_calls (agent_id, provider, called_at) VALUES (?, ?, ?)",
                )
                .bind(&agent_id)
                .bind(&provider)
                .bind(Utc::now().to_rfc3339())
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn leaderboard(&self) -> anyhow::Result<Vec<LeaderboardRow>> {
        let rows = sqlx::query(
            "SELECT agent_id, display_name, balance, realised_pnl, unrealised_pnl,
                    trade_count, win_count, loss_count, updated_at
             FROM accounts ORDER BY CAST(balance AS REAL) + CAST(unrealised_pnl AS REAL) DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row_to_leaderboard(row) {
                Ok(entry) => out.push(entry),
                Err(e) => warn!(error = %e, "leaderboard: skipping malformed row"),
            }
        }
        Ok(out)
    }
}
