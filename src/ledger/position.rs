// =============================================================================
// Position
// =============================================================================
//
// Fixed-point futures position record: entry/mark/liquidation price, P&L,
// and stop-loss/take-profit triggers. No partial closes, no trailing stop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Manual,
    StopLoss,
    TakeProfit,
    Liquidation,
    ReconcileRemoved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub agent_id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub margin_used: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub liquidation_price: Decimal,
    pub current_price: Decimal,
    pub unrealised_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub venue_client_order_id: String,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Directional price delta in the position's favour: positive when the
    /// position is winning.
    fn favourable_delta(&self, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        }
    }

    pub fn liquidation_price_for(side: Side, entry_price: Decimal, leverage: u32) -> Decimal {
        let one = Decimal::ONE;
        let inv_leverage = one / Decimal::from(leverage.max(1));
        match side {
            Side::Long => entry_price * (one - inv_leverage),
            Side::Short => entry_price * (one + inv_leverage),
        }
    }

    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealised_pnl = self.favourable_delta(price) * self.quantity;
    }

    /// Returns the exit reason if `price` has crossed this position's SL or
    /// TP. Stop-loss takes precedence over take-profit when both are
    /// crossed in the same snapshot.
    pub fn trigger_at(&self, price: Decimal) -> Option<ExitReason> {
        if self.status != PositionStatus::Open {
            return None;
        }
        let sl_hit = self.stop_loss_price.is_some_and(|sl| match self.side {
            Side::Long => price <= sl,
            Side::Short => price >= sl,
        });
        if sl_hit {
            return Some(ExitReason::StopLoss);
        }
        let tp_hit = self.take_profit_price.is_some_and(|tp| match self.side {
            Side::Long => price >= tp,
            Side::Short => price <= tp,
        });
        if tp_hit {
            return Some(ExitReason::TakeProfit);
        }
        None
    }

    /// Realised P&L if this position were closed at `exit_price`.
    pub fn realised_pnl_at(&self, exit_price: Decimal) -> Decimal {
        self.favourable_delta(exit_price) * self.quantity
    }

    /// ROI percent: directional price move relative to entry, scaled by
    /// leverage.
    pub fn roi_pct_at(&self, exit_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.favourable_delta(exit_price) / self.entry_price) * Decimal::from(100)
            * Decimal::from(self.leverage)
    }

    /// P&L percent relative to margin committed.
    pub fn pnl_pct_at(&self, exit_price: Decimal) -> Decimal {
        if self.margin_used.is_zero() {
            return Decimal::ZERO;
        }
        (self.realised_pnl_at(exit_price) / self.margin_used) * Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_position(side: Side, entry: Decimal, leverage: u32) -> Position {
        Position {
            id: Uuid::new_v4(),
            agent_id: "a1".into(),
            symbol: "BTCUSDT".into(),
            side,
            entry_price: entry,
            quantity: dec!(1),
            leverage,
            margin_used: entry / Decimal::from(leverage),
            stop_loss_price: None,
            take_profit_price: None,
            liquidation_price: Position::liquidation_price_for(side, entry, leverage),
            current_price: entry,
            unrealised_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            venue_client_order_id: "a1_BTCUSDT_1".into(),
        }
    }

    #[test]
    fn long_liquidation_price() {
        let liq = Position::liquidation_price_for(Side::Long, dec!(100), 10);
        assert_eq!(liq, dec!(90));
    }

    #[test]
    fn short_liquidation_price() {
        let liq = Position::liquidation_price_for(Side::Short, dec!(100), 10);
        assert_eq!(liq, dec!(110));
    }

    #[test]
    fn long_pnl_formulas() {
        let pos = sample_position(Side::Long, dec!(100), 10);
        assert_eq!(pos.realised_pnl_at(dec!(110)), dec!(10));
        assert_eq!(pos.roi_pct_at(dec!(110)), dec!(100));
    }

    #[test]
    fn short_pnl_formulas() {
        let pos = sample_position(Side::Short, dec!(100), 10);
        assert_eq!(pos.realised_pnl_at(dec!(90)), dec!(10));
        assert_eq!(pos.roi_pct_at(dec!(90)), dec!(100));
    }

    #[test]
    fn mark_updates_unrealised_pnl() {
        let mut pos = sample_position(Side::Long, dec!(100), 5);
        pos.mark(dec!(105));
        assert_eq!(pos.unrealised_pnl, dec!(5));
        assert_eq!(pos.current_price, dec!(105));
    }

    #[test]
    fn stop_loss_takes_precedence_over_take_profit() {
        let mut pos = sample_position(Side::Long, dec!(100), 5);
        pos.stop_loss_price = Some(dec!(95));
        pos.take_profit_price = Some(dec!(95));
        assert_eq!(pos.trigger_at(dec!(95)), Some(ExitReason::StopLoss));
    }

    #[test]
    fn no_trigger_mid_range() {
        let mut pos = sample_position(Side::Long, dec!(100), 5);
        pos.stop_loss_price = Some(dec!(90));
        pos.take_profit_price = Some(dec!(120));
        assert_eq!(pos.trigger_at(dec!(105)), None);
    }
}
