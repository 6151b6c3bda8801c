// =============================================================================
// Account
// =============================================================================
//
// One ledger per agent, guarded by its own lock, holding fixed-point
// balances, open positions, and trade history.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::{ExitReason, Position, PositionStatus, Side};
use crate::decision::Decision;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenPositionError {
    InvalidSize,
    InvalidLeverage,
    DuplicateSymbol,
    InsufficientMargin,
    MaxPositionsReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub agent_id: String,
    pub position_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub realised_pnl: Decimal,
    pub pnl_pct: Decimal,
    pub fees: Decimal,
    pub exit_reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Inner state held behind the account's lock. Kept separate from `Account`
/// itself so read-only projections can clone it without touching the lock
/// wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub agent_id: String,
    pub balance: Decimal,
    pub margin_used: Decimal,
    pub realised_pnl: Decimal,
    pub unrealised_pnl: Decimal,
    pub trade_count: u64,
    pub win_count: u64,
    pub loss_count: u64,
    pub api_calls_window: u32,
    pub last_decision_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub positions: Vec<Position>,
}

impl AccountState {
    fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
    }

    pub fn equity(&self) -> Decimal {
        self.balance + self.unrealised_pnl
    }
}

pub struct Account {
    state: RwLock<AccountState>,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenPositionParams<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub quantity_usd: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub sl_pct: Option<Decimal>,
    pub tp_pct: Option<Decimal>,
    pub max_open_positions: usize,
    pub max_leverage: u32,
    pub min_trade_size: Decimal,
    pub max_trade_size: Decimal,
    pub one_per_symbol: bool,
    pub client_order_id: &'a str,
}

impl Account {
    pub fn new(agent_id: impl Into<String>, starting_balance: Decimal) -> Self {
        Self {
            state: RwLock::new(AccountState {
                agent_id: agent_id.into(),
                balance: starting_balance,
                margin_used: Decimal::ZERO,
                realised_pnl: Decimal::ZERO,
                unrealised_pnl: Decimal::ZERO,
                trade_count: 0,
                win_count: 0,
                loss_count: 0,
                api_calls_window: 0,
                last_decision_at: None,
                enabled: true,
                positions: Vec::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> AccountState {
        self.state.read().clone()
    }

    pub fn disable(&self, _reason: &str) {
        self.state.write().enabled = false;
    }

    pub fn record_decision(&self) {
        let mut s = self.state.write();
        s.last_decision_at = Some(Utc::now());
        s.api_calls_window = s.api_calls_window.saturating_add(1);
    }

    pub fn open_position(
        &self,
        params: OpenPositionParams,
    ) -> Result<Position, OpenPositionError> {
        if params.quantity_usd < params.min_trade_size || params.quantity_usd > params.max_trade_size
        {
            return Err(OpenPositionError::InvalidSize);
        }
        if params.leverage < 1 || params.leverage > params.max_leverage {
            return Err(OpenPositionError::InvalidLeverage);
        }

        let mut s = self.state.write();

        if params.one_per_symbol
            && s.open_positions().any(|p| p.symbol == params.symbol)
        {
            return Err(OpenPositionError::DuplicateSymbol);
        }
        if s.open_positions().count() >= params.max_open_positions {
            return Err(OpenPositionError::MaxPositionsReached);
        }

        let margin = params.quantity_usd / Decimal::from(params.leverage);
        if s.balance - s.margin_used < margin {
            return Err(OpenPositionError::InsufficientMargin);
        }

        let quantity = params.quantity_usd / params.entry_price;
        let liquidation_price =
            Position::liquidation_price_for(params.side, params.entry_price, params.leverage);

        let sl_price = params.sl_pct.map(|pct| match params.side {
            Side::Long => params.entry_price * (Decimal::ONE - pct / Decimal::from(100)),
            Side::Short => params.entry_price * (Decimal::ONE + pct / Decimal::from(100)),
        });
        let tp_price = params.tp_pct.map(|pct| match params.side {
            Side::Long => params.entry_price * (Decimal::ONE + pct / Decimal::from(100)),
            Side::Short => params.entry_price * (Decimal::ONE - pct / Decimal::from(100)),
        });

        let position = Position {
            id: Uuid::new_v4(),
            agent_id: s.agent_id.clone(),
            symbol: params.symbol.to_string(),
            side: params.side,
            entry_price: params.entry_price,
            quantity,
            leverage: params.leverage,
            margin_used: margin,
            stop_loss_price: sl_price,
            take_profit_price: tp_price,
            liquidation_price,
            current_price: params.entry_price,
            unrealised_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            venue_client_order_id: params.client_order_id.to_string(),
        };

        s.margin_used += margin;
        s.positions.push(position.clone());
        Ok(position)
    }

    pub fn close_position(
        &self,
        position_id: Uuid,
        exit_price: Decimal,
        reason: ExitReason,
    ) -> Option<Trade> {
        let mut s = self.state.write();
        let idx = s
            .positions
            .iter()
            .position(|p| p.id == position_id && p.status == PositionStatus::Open)?;

        let pnl = s.positions[idx].realised_pnl_at(exit_price);
        let pnl_pct = s.positions[idx].pnl_pct_at(exit_price);
        let margin = s.positions[idx].margin_used;

        let trade = Trade {
            id: Uuid::new_v4(),
            agent_id: s.agent_id.clone(),
            position_id: s.positions[idx].id,
            symbol: s.positions[idx].symbol.clone(),
            side: s.positions[idx].side,
            entry_price: s.positions[idx].entry_price,
            exit_price,
            quantity: s.positions[idx].quantity,
            leverage: s.positions[idx].leverage,
            realised_pnl: pnl,
            pnl_pct,
            fees: Decimal::ZERO,
            exit_reason: reason,
            opened_at: s.positions[idx].opened_at,
            closed_at: Utc::now(),
        };

        s.positions[idx].status = if reason == ExitReason::Liquidation {
            PositionStatus::Liquidated
        } else {
            PositionStatus::Closed
        };
        s.margin_used -= margin;
        s.balance += pnl;
        s.realised_pnl += pnl;
        s.trade_count += 1;
        if pnl >= Decimal::ZERO {
            s.win_count += 1;
        } else {
            s.loss_count += 1;
        }

        Some(trade)
    }

    pub fn mark_to_market(&self, prices: &std::collections::HashMap<String, Decimal>) {
        let mut s = self.state.write();
        let mut total_unrealised = Decimal::ZERO;
        for position in s.positions.iter_mut() {
            if position.status != PositionStatus::Open {
                continue;
            }
            if let Some(price) = prices.get(&position.symbol) {
                position.mark(*price);
            }
            total_unrealised += position.unrealised_pnl;
        }
        s.unrealised_pnl = total_unrealised;
    }

    /// Positions whose SL/TP has been crossed by `prices`, in deterministic
    /// order: ascending `opened_at`, then position id.
    pub fn evaluate_triggers(
        &self,
        prices: &std::collections::HashMap<String, Decimal>,
    ) -> Vec<(Uuid, ExitReason)> {
        let s = self.state.read();
        let mut hits: Vec<(Uuid, ExitReason, DateTime<Utc>)> = s
            .open_positions()
            .filter_map(|p| {
                prices
                    .get(&p.symbol)
                    .and_then(|price| p.trigger_at(*price))
                    .map(|reason| (p.id, reason, p.opened_at))
            })
            .collect();
        hits.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
        hits.into_iter().map(|(id, reason, _)| (id, reason)).collect()
    }

    pub fn open_position_count(&self) -> usize {
        self.state.read().open_positions().count()
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.state.read().open_positions().any(|p| p.symbol == symbol)
    }

    pub fn open_position_for_symbol(&self, symbol: &str) -> Option<Position> {
        self.state
            .read()
            .open_positions()
            .find(|p| p.symbol == symbol)
            .cloned()
    }

    /// Used only by the reconciler: insert a position discovered at the
    /// venue that has no local counterpart.
    pub fn adopt_position(&self, position: Position) {
        let mut s = self.state.write();
        s.margin_used += position.margin_used;
        s.positions.push(position);
    }

    /// Used only by the reconciler: adjust quantity/entry of a local
    /// position to match what the venue reports.
    pub fn reconcile_update(&self, position_id: Uuid, quantity: Decimal, entry_price: Decimal) {
        let mut s = self.state.write();
        let Some(idx) = s.positions.iter().position(|p| p.id == position_id) else {
            return;
        };
        let old_margin = s.positions[idx].margin_used;
        let leverage = s.positions[idx].leverage;
        let new_margin = (entry_price * quantity) / Decimal::from(leverage);
        s.positions[idx].quantity = quantity;
        s.positions[idx].entry_price = entry_price;
        s.positions[idx].margin_used = new_margin;
        s.margin_used = s.margin_used - old_margin + new_margin;
    }

    pub fn apply_decision_context(&self, _decision: &Decision) {
        self.record_decision();
    }
}
