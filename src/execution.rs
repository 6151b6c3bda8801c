// =============================================================================
// Trade executor
// =============================================================================
//
// Venue-first-then-account ordering: place the order, then mutate the
// account. If the process dies between venue confirmation and the account
// mutation, the reconciler (`reconcile.rs`) is the authoritative repair
// path, not a retry here.

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::decision::{Decision, Validator};
use crate::ledger::account::OpenPositionError;
use crate::ledger::{Account, ExitReason, Position, Side};
use crate::market_snapshot::MarketSnapshot;
use crate::parsing::ParsedDecision;
use crate::risk::{self, RejectionReason};
use crate::venue::VenueClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Opened,
    Closed,
    Held,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    /// Set only when `status` is `Opened` — the position the executor just
    /// created, so callers can publish it without a second account lookup.
    pub position: Option<Position>,
}

impl ExecutionResult {
    fn rejected(reason: RejectionReason) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            reason: Some(reason.to_string()),
            position: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            reason: Some(reason.into()),
            position: None,
        }
    }

    fn opened(position: Position) -> Self {
        Self {
            status: ExecutionStatus::Opened,
            reason: None,
            position: Some(position),
        }
    }
}

fn client_order_id(agent_id: &str, symbol: &str) -> String {
    format!("{agent_id}_{symbol}_{}", Utc::now().timestamp_millis())
}

/// `Execute(decision, account, snapshot) -> ExecutionResult`. Invokes the
/// risk validator first; an accepted BUY/SELL places the venue order, then
/// mutates the account only on venue success. CLOSE mirrors the same
/// ordering against the open position. HOLD is a no-op success.
pub async fn execute(
    venue: &dyn VenueClient,
    account: &Account,
    decision: &Decision,
    parsed: &ParsedDecision,
    snapshot: Option<&MarketSnapshot>,
    cfg: &crate::config::Config,
    rejection_sample_rate: f64,
) -> (ExecutionResult, Option<crate::decision::RejectedDecision>) {
    let state = account.snapshot();
    if let Err(reason) = risk::validate(parsed, &state, snapshot, cfg) {
        warn!(
            agent_id = %decision.agent_id,
            reason = %reason,
            "risk validator rejected decision"
        );
        let sampled = if rand::thread_rng().gen_bool(rejection_sample_rate.clamp(0.0, 1.0)) {
            Some(decision.clone().reject(reason.to_string(), Validator::RiskValidator))
        } else {
            None
        };
        return (ExecutionResult::rejected(reason), sampled);
    }

    match parsed.action {
        crate::decision::Action::Hold => (
            ExecutionResult {
                status: ExecutionStatus::Held,
                reason: None,
                position: None,
            },
            None,
        ),
        crate::decision::Action::Close => {
            let symbol = parsed.symbol.as_deref().unwrap_or_default();
            let Some(position) = account.open_position_for_symbol(symbol) else {
                return (ExecutionResult::rejected(RejectionReason::NoOpenPosition), None);
            };
            let result = close_at_venue(venue, account, &decision.agent_id, &position.symbol, position.id, position.quantity, position.side, ExitReason::Manual).await;
            (result, None)
        }
        crate::decision::Action::Buy | crate::decision::Action::Sell => {
            let symbol = parsed.symbol.as_deref().unwrap_or_default();
            let Some(snapshot) = snapshot else {
                return (ExecutionResult::rejected(RejectionReason::PriceUnavailable), None);
            };
            let side = match parsed.action {
                crate::decision::Action::Buy => Side::Long,
                _ => Side::Short,
            };
            let result = open_at_venue(venue, account, &decision.agent_id, symbol, side, parsed, snapshot, cfg).await;
            (result, None)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn open_at_venue(
    venue: &dyn VenueClient,
    account: &Account,
    agent_id: &str,
    symbol: &str,
    side: Side,
    parsed: &ParsedDecision,
    snapshot: &MarketSnapshot,
    cfg: &crate::config::Config,
) -> ExecutionResult {
    let quantity_usd = parsed.quantity_usd.unwrap_or_default();
    let leverage = parsed.leverage.unwrap_or(1);
    let entry_price = snapshot.price;

    let filters = match venue.get_symbol_filters(symbol).await {
        Ok(f) => f,
        Err(e) => return ExecutionResult::failed(format!("symbol filter lookup failed: {e}")),
    };

    let raw_quantity = quantity_usd / entry_price;
    let quantity = round_down_to_step(raw_quantity, filters.quantity_step);
    let notional = quantity * entry_price;
    if notional < filters.min_notional {
        return ExecutionResult::rejected(RejectionReason::BelowMinNotional);
    }

    if let Err(e) = venue.set_leverage(symbol, leverage).await {
        return ExecutionResult::failed(format!("set_leverage failed: {e}"));
    }

    let client_order_id = client_order_id(agent_id, symbol);
    let fill = match venue
        .place_market_order(symbol, side, quantity, &client_order_id)
        .await
    {
        Ok(fill) => fill,
        Err(e) => {
            warn!(agent_id, symbol, error = %e, "venue order placement failed");
            return ExecutionResult::failed(e.to_string());
        }
    };

    let params = crate::ledger::OpenPositionParams {
        symbol,
        side,
        quantity_usd,
        leverage,
        entry_price: fill.avg_price,
        sl_pct: parsed.stop_loss_pct,
        tp_pct: parsed.take_profit_pct,
        max_open_positions: cfg.risk.max_open_positions,
        max_leverage: cfg.risk.max_leverage,
        min_trade_size: cfg.risk.min_trade_size_usd,
        max_trade_size: cfg.risk.max_trade_size_usd,
        one_per_symbol: cfg.risk.one_open_position_per_symbol,
        client_order_id: &client_order_id,
    };

    match account.open_position(params) {
        Ok(position) => {
            info!(agent_id, symbol, position_id = %position.id, "position opened");
            ExecutionResult::opened(position)
        }
        Err(e) => {
            // Venue confirmed the fill but the account precondition failed
            // (e.g. a concurrent decision already used up the margin). The
            // position now lives only at the venue; the reconciler will
            // adopt it on the next pass.
            warn!(
                agent_id, symbol, error = ?e,
                "account rejected position after venue fill — awaiting reconciliation"
            );
            ExecutionResult::rejected(open_position_error_to_rejection(e))
        }
    }
}

async fn close_at_venue(
    venue: &dyn VenueClient,
    account: &Account,
    agent_id: &str,
    symbol: &str,
    position_id: uuid::Uuid,
    quantity: Decimal,
    side: Side,
    reason: ExitReason,
) -> ExecutionResult {
    let close_side = match side {
        Side::Long => Side::Short,
        Side::Short => Side::Long,
    };
    let client_order_id = client_order_id(agent_id, symbol);
    let fill = match venue
        .place_market_order(symbol, close_side, quantity, &client_order_id)
        .await
    {
        Ok(fill) => fill,
        Err(e) => {
            warn!(agent_id, symbol, error = %e, "venue close order failed");
            return ExecutionResult::failed(e.to_string());
        }
    };

    match account.close_position(position_id, fill.avg_price, reason) {
        Some(trade) => {
            info!(agent_id, symbol, pnl = %trade.realised_pnl, "position closed");
            ExecutionResult {
                status: ExecutionStatus::Closed,
                reason: None,
                position: None,
            }
        }
        None => ExecutionResult::failed("position vanished between venue fill and local close"),
    }
}

fn round_down_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return quantity;
    }
    (quantity / step).floor() * step
}

fn open_position_error_to_rejection(err: OpenPositionError) -> RejectionReason {
    match err {
        OpenPositionError::InvalidSize => RejectionReason::InvalidSize,
        OpenPositionError::InvalidLeverage => RejectionReason::InvalidLeverage,
        OpenPositionError::DuplicateSymbol => RejectionReason::DuplicateSymbol,
        OpenPositionError::InsufficientMargin => RejectionReason::InsufficientMargin,
        OpenPositionError::MaxPositionsReached => RejectionReason::MaxPositionsReached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_down_to_step() {
        assert_eq!(round_down_to_step(dec!(1.2345), dec!(0.001)), dec!(1.234));
        assert_eq!(round_down_to_step(dec!(1), dec!(0.5)), dec!(1.0));
    }

    #[test]
    fn zero_step_is_identity() {
        assert_eq!(round_down_to_step(dec!(1.2345), dec!(0)), dec!(1.2345));
    }

    #[tokio::test]
    async fn hold_is_a_no_op_success() {
        let venue = crate::venue::mock::MockVenue::new();
        let account = Account::new("a1", dec!(10000));
        let decision = Decision::hold("a1", uuid::Uuid::new_v4(), "nothing to do");
        let parsed = ParsedDecision {
            action: crate::decision::Action::Hold,
            symbol: None,
            quantity_usd: None,
            leverage: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            reasoning: "nothing to do".into(),
            confidence: None,
            strategy: None,
        };
        let cfg = crate::config::Config::default();
        let (result, sampled) =
            execute(&venue, &account, &decision, &parsed, None, &cfg, 1.0).await;
        assert_eq!(result.status, ExecutionStatus::Held);
        assert!(sampled.is_none());
    }
}
