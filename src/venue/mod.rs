// =============================================================================
// Venue client
// =============================================================================

pub mod binance_futures;
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::ledger::Side;
use crate::market_data::Candle;

#[derive(Debug, Clone, Copy)]
pub struct SymbolFilters {
    pub price_tick: Decimal,
    pub quantity_step: Decimal,
    pub min_notional: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_24h: Decimal,
    pub price_change_pct_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
}

#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    /// The client-order-id of the order that opened this position, when the
    /// venue can still associate one (via recent order history).
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    pub client_order_id: String,
    pub avg_price: Decimal,
    pub filled_qty: Decimal,
}

/// Narrow, futures-specific venue contract. Every method returns
/// `anyhow::Result` at this boundary; callers convert to
/// `AppError::TransportVenue` / `AppError::VenueReject` as appropriate.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn get_ticker(&self, symbol: &str) -> anyhow::Result<Ticker>;

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<Candle>>;

    async fn get_symbol_filters(&self, symbol: &str) -> anyhow::Result<SymbolFilters>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> anyhow::Result<OrderFill>;

    async fn get_open_positions(&self) -> anyhow::Result<Vec<VenuePosition>>;

    /// Assert the account is in one-way (non-hedge) position mode. Called
    /// once at startup; fails fast rather than trying to switch modes for
    /// the operator.
    async fn assert_one_way_mode(&self) -> anyhow::Result<()>;
}
