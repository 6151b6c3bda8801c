// =============================================================================
// Risk validator
// =============================================================================
//
// A pure, side-effect-free validator, reusable for dry-run evaluation: no
// circuit-breaker state, just an ordered chain of short-circuit checks that
// returns a structured rejection reason on the first one that fails. The
// call site logs a `tracing::warn!` on rejection.

use rust_decimal::Decimal;

use crate::config::{Config, RiskLimits};
use crate::decision::Action;
use crate::ledger::account::AccountState;
use crate::market_snapshot::MarketSnapshot;
use crate::parsing::ParsedDecision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    SymbolNotAllowed,
    PriceUnavailable,
    NoOpenPosition,
    MaxPositionsReached,
    DuplicateSymbol,
    InvalidSize,
    BelowMinNotional,
    InvalidLeverage,
    InsufficientMargin,
    StopLossOutOfRange,
    TakeProfitOutOfRange,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Pure function: `Validate(decision, account, market, cfg) -> accept|reject`.
/// Checks run in the exact order named below and short-circuit on the first
/// failure.
pub fn validate(
    parsed: &ParsedDecision,
    account: &AccountState,
    market: Option<&MarketSnapshot>,
    cfg: &Config,
) -> Result<(), RejectionReason> {
    // 1. HOLD is always accepted as a no-op.
    if parsed.action == Action::Hold {
        return Ok(());
    }

    // 2. Symbol must be in the configured allow-list.
    let symbol = parsed.symbol.as_deref().unwrap_or_default();
    if !cfg.symbols.iter().any(|s| s == symbol) {
        return Err(RejectionReason::SymbolNotAllowed);
    }

    // 3. Market price must be available.
    let market = market.ok_or(RejectionReason::PriceUnavailable)?;

    match parsed.action {
        Action::Close => {
            if !account
                .positions
                .iter()
                .any(|p| p.symbol == symbol && p.status == crate::ledger::PositionStatus::Open)
            {
                return Err(RejectionReason::NoOpenPosition);
            }
            Ok(())
        }
        Action::Buy | Action::Sell => validate_open(parsed, account, market, &cfg.risk),
        Action::Hold => unreachable!(),
    }
}

fn validate_open(
    parsed: &ParsedDecision,
    account: &AccountState,
    market: &MarketSnapshot,
    limits: &RiskLimits,
) -> Result<(), RejectionReason> {
    let open_count = account
        .positions
        .iter()
        .filter(|p| p.status == crate::ledger::PositionStatus::Open)
        .count();
    if open_count >= limits.max_open_positions {
        return Err(RejectionReason::MaxPositionsReached);
    }

    let symbol = parsed.symbol.as_deref().unwrap_or_default();
    if limits.one_open_position_per_symbol
        && account
            .positions
            .iter()
            .any(|p| p.symbol == symbol && p.status == crate::ledger::PositionStatus::Open)
    {
        return Err(RejectionReason::DuplicateSymbol);
    }

    let quantity_usd = parsed.quantity_usd.unwrap_or(Decimal::ZERO);
    if quantity_usd < limits.min_trade_size_usd || quantity_usd > limits.max_trade_size_usd {
        return Err(RejectionReason::InvalidSize);
    }

    let leverage = parsed.leverage.unwrap_or(1);
    if leverage < 1 || leverage > limits.max_leverage {
        return Err(RejectionReason::InvalidLeverage);
    }

    let margin_needed = quantity_usd / Decimal::from(leverage);
    if account.balance - account.margin_used < margin_needed {
        return Err(RejectionReason::InsufficientMargin);
    }

    if let Some(sl) = parsed.stop_loss_pct {
        if sl < limits.sl_pct_min || sl > limits.sl_pct_max {
            return Err(RejectionReason::StopLossOutOfRange);
        }
    }
    if let Some(tp) = parsed.take_profit_pct {
        if tp < limits.tp_pct_min || tp > limits.tp_pct_max {
            return Err(RejectionReason::TakeProfitOutOfRange);
        }
    }

    let _ = market.price;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::ledger::Account;
    use crate::market_snapshot::Indicators;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn cfg() -> Config {
        let mut cfg = Config::default();
        cfg.symbols = vec!["BTCUSDT".to_string()];
        cfg.agents.push(crate::config::AgentConfig {
            id: "a1".into(),
            display_name: "Agent One".into(),
            provider: ProviderKind::Anthropic,
            model: "claude".into(),
            system_prompt: None,
            starting_balance: dec!(10000),
        });
        cfg
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".into(),
            price: dec!(100),
            bid: dec!(99.9),
            ask: dec!(100.1),
            volume_24h: dec!(1000),
            price_change_pct_24h: dec!(1),
            high_24h: dec!(101),
            low_24h: dec!(99),
            indicators: Indicators::default(),
            fetched_at: Utc::now(),
        }
    }

    fn parsed_buy() -> ParsedDecision {
        ParsedDecision {
            action: Action::Buy,
            symbol: Some("BTCUSDT".into()),
            quantity_usd: Some(dec!(1000)),
            leverage: Some(5),
            stop_loss_pct: Some(dec!(5)),
            take_profit_pct: Some(dec!(10)),
            reasoning: "test".into(),
            confidence: Some(0.8),
            strategy: None,
        }
    }

    #[test]
    fn hold_always_accepted() {
        let acct = Account::new("a1", dec!(10000)).snapshot();
        let parsed = ParsedDecision {
            action: Action::Hold,
            symbol: None,
            quantity_usd: None,
            leverage: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            reasoning: "nothing".into(),
            confidence: None,
            strategy: None,
        };
        assert!(validate(&parsed, &acct, None, &cfg()).is_ok());
    }

    #[test]
    fn symbol_not_allowed() {
        let acct = Account::new("a1", dec!(10000)).snapshot();
        let mut parsed = parsed_buy();
        parsed.symbol = Some("DOGEUSDT".into());
        assert_eq!(
            validate(&parsed, &acct, Some(&snapshot()), &cfg()),
            Err(RejectionReason::SymbolNotAllowed)
        );
    }

    #[test]
    fn price_unavailable() {
        let acct = Account::new("a1", dec!(10000)).snapshot();
        assert_eq!(
            validate(&parsed_buy(), &acct, None, &cfg()),
            Err(RejectionReason::PriceUnavailable)
        );
    }

    #[test]
    fn close_without_open_position_rejected() {
        let acct = Account::new("a1", dec!(10000)).snapshot();
        let mut parsed = parsed_buy();
        parsed.action = Action::Close;
        assert_eq!(
            validate(&parsed, &acct, Some(&snapshot()), &cfg()),
            Err(RejectionReason::NoOpenPosition)
        );
    }

    #[test]
    fn insufficient_margin_rejected() {
        let acct = Account::new("a1", dec!(50)).snapshot();
        assert_eq!(
            validate(&parsed_buy(), &acct, Some(&snapshot()), &cfg()),
            Err(RejectionReason::InsufficientMargin)
        );
    }

    #[test]
    fn valid_buy_accepted() {
        let acct = Account::new("a1", dec!(10000)).snapshot();
        assert!(validate(&parsed_buy(), &acct, Some(&snapshot()), &cfg()).is_ok());
    }

    #[test]
    fn leverage_out_of_range_rejected() {
        let acct = Account::new("a1", dec!(10000)).snapshot();
        let mut parsed = parsed_buy();
        parsed.leverage = Some(50);
        assert_eq!(
            validate(&parsed, &acct, Some(&snapshot()), &cfg()),
            Err(RejectionReason::InvalidLeverage)
        );
    }
}
