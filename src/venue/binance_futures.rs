// =============================================================================
// Binance USDⓈ-M Futures client
// =============================================================================
//
// HMAC-signing scaffolding, `reqwest::Client`, `#[instrument]` +
// `anyhow::Context` idiom over the USDⓈ-M futures endpoint set
// (`/fapi/v1/...`, `/fapi/v2/...`).
//
// SECURITY: the secret key is never logged or serialized.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::ledger::Side;
use crate::market_data::Candle;

use super::{OrderFill, SymbolFilters, Ticker, VenueClient, VenuePosition};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

#[derive(Clone)]
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limits: std::sync::Arc<RateLimitTracker>,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceFuturesClient initialised (base_url=https://fapi.binance.com)");

        Self {
            api_key,
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
            rate_limits: std::sync::Arc::new(RateLimitTracker::new()),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn decimal_field(val: &serde_json::Value, name: &str) -> Result<Decimal> {
        if let Some(s) = val.as_str() {
            Decimal::from_str(s).with_context(|| format!("failed to parse {name}='{s}' as decimal"))
        } else if let Some(n) = val.as_f64() {
            Decimal::try_from(n).with_context(|| format!("failed to parse {name}={n} as decimal"))
        } else {
            anyhow::bail!("field {name} has unexpected JSON type: {val}")
        }
    }
}

#[async_trait]
impl VenueClient for BinanceFuturesClient {
    #[instrument(skip(self), name = "binance_futures::get_ticker")]
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let url = format!("{}/fapi/v1/ticker/24hr?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/ticker/24hr request failed")?;

        self.rate_limits.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse ticker/24hr response")?;
        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/ticker/24hr returned {status}: {body}");
        }

        let price = Self::decimal_field(&body["lastPrice"], "lastPrice")?;
        let high_24h = Self::decimal_field(&body["highPrice"], "highPrice")?;
        let low_24h = Self::decimal_field(&body["lowPrice"], "lowPrice")?;
        let volume_24h = Self::decimal_field(&body["quoteVolume"], "quoteVolume")?;
        let price_change_pct_24h =
            Self::decimal_field(&body["priceChangePercent"], "priceChangePercent")?;

        // The 24hr ticker has no live bid/ask; approximate with a tight
        // synthetic spread around last price rather than an extra request.
        let spread = price / Decimal::from(10_000);
        Ok(Ticker {
            price,
            bid: price - spread,
            ask: price + spread,
            volume_24h,
            price_change_pct_24h,
            high_24h,
            low_24h,
        })
    }

    #[instrument(skip(self), name = "binance_futures::get_klines")]
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/klines request failed")?;

        self.rate_limits.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;
        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/klines returned {status}: {body}");
        }

        let raw = body.as_array().context("klines response is not an array")?;
        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 11 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }
            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1])?;
            let high = Self::parse_str_f64(&arr[2])?;
            let low = Self::parse_str_f64(&arr[3])?;
            let close = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])?;
            let close_time = arr[6].as_i64().unwrap_or(0);
            candles.push(Candle {
                open_time,
                close_time,
                open,
                high,
                low,
                close,
                volume,
                quote_volume: 0.0,
                trades_count: 0,
                taker_buy_volume: 0.0,
                taker_buy_quote_volume: 0.0,
                is_closed: true,
            });
        }
        Ok(candles)
    }

    #[instrument(skip(self), name = "binance_futures::get_symbol_filters")]
    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let url = format!("{}/fapi/v1/exchangeInfo?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/exchangeInfo request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse exchangeInfo response")?;
        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v1/exchangeInfo returned {status}: {body}");
        }

        let info = body["symbols"]
            .as_array()
            .and_then(|arr| arr.first())
            .context("symbol not found in exchangeInfo response")?;

        let filters = info["filters"]
            .as_array()
            .context("exchangeInfo entry missing filters array")?;

        let mut price_tick = Decimal::new(1, 2);
        let mut quantity_step = Decimal::new(1, 3);
        let mut min_notional = Decimal::from(5);

        for f in filters {
            match f["filterType"].as_str() {
                Some("PRICE_FILTER") => {
                    price_tick = Self::decimal_field(&f["tickSize"], "tickSize")?;
                }
                Some("LOT_SIZE") => {
                    quantity_step = Self::decimal_field(&f["stepSize"], "stepSize")?;
                }
                Some("MIN_NOTIONAL") => {
                    if let Some(v) = f.get("notional") {
                        min_notional = Self::decimal_field(v, "notional")?;
                    }
                }
                _ => {}
            }
        }

        Ok(SymbolFilters {
            price_tick,
            quantity_step,
            min_notional,
        })
    }

    #[instrument(skip(self), name = "binance_futures::set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let params = format!("symbol={symbol}&leverage={leverage}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/leverage request failed")?;

        self.rate_limits.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse leverage response")?;
        if !status.is_success() {
            anyhow::bail!("Binance POST /fapi/v1/leverage returned {status}: {body}");
        }
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    #[instrument(skip(self), name = "binance_futures::place_market_order")]
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<OrderFill> {
        if !self.rate_limits.can_place_order() {
            anyhow::bail!("order rate limit reached, refusing to place order");
        }

        let side_str = match side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let params = format!(
            "symbol={symbol}&side={side_str}&type=MARKET&quantity={quantity}&newClientOrderId={client_order_id}"
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /fapi/v1/order request failed")?;

        self.rate_limits.update_from_headers(resp.headers());
        self.rate_limits.record_order_sent();
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse order response")?;
        if !status.is_success() {
            anyhow::bail!("Binance POST /fapi/v1/order returned {status}: {body}");
        }

        let order_id = body["orderId"]
            .as_u64()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let avg_price = Self::decimal_field(&body["avgPrice"], "avgPrice").unwrap_or(Decimal::ZERO);
        let filled_qty =
            Self::decimal_field(&body["executedQty"], "executedQty").unwrap_or(quantity);

        Ok(OrderFill {
            order_id,
            client_order_id: client_order_id.to_string(),
            avg_price,
            filled_qty,
        })
    }

    #[instrument(skip(self), name = "binance_futures::get_open_positions")]
    async fn get_open_positions(&self) -> Result<Vec<VenuePosition>> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/positionRisk request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse positionRisk response")?;
        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v2/positionRisk returned {status}: {body}");
        }

        let entries = body.as_array().context("positionRisk response is not an array")?;
        let mut positions = Vec::new();
        for entry in entries {
            let quantity = Self::decimal_field(&entry["positionAmt"], "positionAmt")?;
            if quantity.is_zero() {
                continue;
            }
            let symbol = entry["symbol"].as_str().unwrap_or_default().to_string();
            let entry_price = Self::decimal_field(&entry["entryPrice"], "entryPrice")?;
            let side = if quantity.is_sign_positive() {
                Side::Long
            } else {
                Side::Short
            };
            let leverage = entry["leverage"]
                .as_str()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(1);
            positions.push(VenuePosition {
                symbol,
                side,
                quantity: quantity.abs(),
                entry_price,
                leverage,
                // positionRisk carries no client-order-id; back-correlation
                // against recent order history happens in the reconciler.
                client_order_id: None,
            });
        }
        Ok(positions)
    }

    #[instrument(skip(self), name = "binance_futures::assert_one_way_mode")]
    async fn assert_one_way_mode(&self) -> Result<()> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/account?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/account request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse account response")?;
        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v2/account returned {status}: {body}");
        }

        let dual_side = body["dualSidePosition"].as_bool().unwrap_or(false);
        if dual_side {
            anyhow::bail!(
                "account is in hedge (dual-side) position mode; this engine requires one-way mode"
            );
        }
        Ok(())
    }
}

impl BinanceFuturesClient {
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>().with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
