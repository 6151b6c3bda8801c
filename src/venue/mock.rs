// =============================================================================
// Mock venue client — used by tests and `Simulate` executor mode
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::ledger::Side;
use crate::market_data::Candle;

use super::{OrderFill, SymbolFilters, Ticker, VenueClient, VenuePosition};

pub struct MockVenue {
    pub prices: Mutex<HashMap<String, Decimal>>,
    pub open_positions: Mutex<Vec<VenuePosition>>,
    pub order_counter: Mutex<u64>,
    pub leverages: Mutex<HashMap<String, u32>>,
}

impl MockVenue {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            open_positions: Mutex::new(Vec::new()),
            order_counter: Mutex::new(0),
            leverages: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    /// Test helper: inject a venue position directly, bypassing order
    /// placement, to exercise reconciliation against pre-existing state.
    pub fn seed_open_position(&self, position: VenuePosition) {
        self.open_positions.lock().push(position);
    }
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    async fn get_ticker(&self, symbol: &str) -> anyhow::Result<Ticker> {
        let price = *self
            .prices
            .lock()
            .get(symbol)
            .ok_or_else(|| anyhow::anyhow!("no price set for {symbol}"))?;
        Ok(Ticker {
            price,
            bid: price,
            ask: price,
            volume_24h: Decimal::from(1_000_000),
            price_change_pct_24h: Decimal::ZERO,
            high_24h: price,
            low_24h: price,
        })
    }

    async fn get_klines(&self, _symbol: &str, _interval: &str, limit: u32) -> anyhow::Result<Vec<Candle>> {
        let price = 100.0;
        Ok((0..limit)
            .map(|i| Candle {
                open_time: i as i64 * 60_000,
                close_time: i as i64 * 60_000 + 59_999,
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price + (i as f64 * 0.01),
                volume: 100.0,
                quote_volume: 100.0,
                trades_count: 10,
                taker_buy_volume: 50.0,
                taker_buy_quote_volume: 50.0,
                is_closed: true,
            })
            .collect())
    }

    async fn get_symbol_filters(&self, _symbol: &str) -> anyhow::Result<SymbolFilters> {
        Ok(SymbolFilters {
            price_tick: Decimal::new(1, 2),
            quantity_step: Decimal::new(1, 4),
            min_notional: Decimal::from(5),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()> {
        self.leverages.lock().insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> anyhow::Result<OrderFill> {
        let price = *self
            .prices
            .lock()
            .get(symbol)
            .ok_or_else(|| anyhow::anyhow!("no price set for {symbol}"))?;
        let mut counter = self.order_counter.lock();
        *counter += 1;
        let leverage = self.leverages.lock().get(symbol).copied().unwrap_or(1);
        self.open_positions.lock().push(VenuePosition {
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price: price,
            leverage,
            client_order_id: Some(client_order_id.to_string()),
        });
        Ok(OrderFill {
            order_id: counter.to_string(),
            client_order_id: client_order_id.to_string(),
            avg_price: price,
            filled_qty: quantity,
        })
    }

    async fn get_open_positions(&self) -> anyhow::Result<Vec<VenuePosition>> {
        Ok(self.open_positions.lock().clone())
    }

    async fn assert_one_way_mode(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
