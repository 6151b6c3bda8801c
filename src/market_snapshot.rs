// =============================================================================
// Market snapshot cache
// =============================================================================
//
// A lock-guarded map keyed by symbol with one in-flight fetch per symbol
// (singleflight) and a per-entry TTL. The lock-scoping discipline never
// holds a guard across an `.await`: scan under a read lock, release it,
// then mutate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::indicators::{macd, rsi, sma};
use crate::venue::VenueClient;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
}

impl Indicators {
    fn from_closes(closes: &[f64]) -> Self {
        let rsi14 = rsi::current_rsi(closes, 14).map(|(v, _)| v);
        let (macd_v, macd_signal) = match macd::current_macd(closes) {
            Some((m, s)) => (Some(m), Some(s)),
            None => (None, None),
        };
        let sma20 = sma::current_sma(closes, 20);
        let sma50 = sma::current_sma(closes, 50);
        Self {
            rsi14,
            macd: macd_v,
            macd_signal,
            sma20,
            sma50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_24h: Decimal,
    pub price_change_pct_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub indicators: Indicators,
    pub fetched_at: DateTime<Utc>,
}

struct CacheEntry {
    snapshot: MarketSnapshot,
    fetched_at: Instant,
}

pub struct SnapshotCache {
    venue: Arc<dyn VenueClient>,
    ttl: Duration,
    indicator_interval: String,
    indicator_lookback: u32,
    entries: AsyncMutex<HashMap<String, CacheEntry>>,
    inflight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SnapshotCache {
    pub fn new(
        venue: Arc<dyn VenueClient>,
        ttl: Duration,
        indicator_interval: String,
        indicator_lookback: u32,
    ) -> Self {
        Self {
            venue,
            ttl,
            indicator_interval,
            indicator_lookback,
            entries: AsyncMutex::new(HashMap::new()),
            inflight: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn fresh(&self, symbol: &str) -> Option<MarketSnapshot> {
        let entries = self.entries.lock().await;
        entries.get(symbol).and_then(|e| {
            if e.fetched_at.elapsed() < self.ttl {
                Some(e.snapshot.clone())
            } else {
                None
            }
        })
    }

    async fn singleflight_guard(&self, symbol: &str) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn refresh_one(&self, symbol: &str) -> anyhow::Result<MarketSnapshot> {
        let ticker = self.venue.get_ticker(symbol).await?;
        let candles = self
            .venue
            .get_klines(symbol, &self.indicator_interval, self.indicator_lookback)
            .await
            .unwrap_or_default();
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let snapshot = MarketSnapshot {
            symbol: symbol.to_string(),
            price: ticker.price,
            bid: ticker.bid,
            ask: ticker.ask,
            volume_24h: ticker.volume_24h,
            price_change_pct_24h: ticker.price_change_pct_24h,
            high_24h: ticker.high_24h,
            low_24h: ticker.low_24h,
            indicators: Indicators::from_closes(&closes),
            fetched_at: Utc::now(),
        };

        self.entries.lock().await.insert(
            symbol.to_string(),
            CacheEntry {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(snapshot)
    }

    /// `PriceOf`: returns the cached value within TTL, else refreshes.
    pub async fn price_of(&self, symbol: &str) -> anyhow::Result<Decimal> {
        if let Some(snap) = self.fresh(symbol).await {
            return Ok(snap.price);
        }
        let guard = self.singleflight_guard(symbol).await;
        let _permit = guard.lock().await;
        if let Some(snap) = self.fresh(symbol).await {
            return Ok(snap.price);
        }
        let snap = self.refresh_one(symbol).await?;
        Ok(snap.price)
    }

    /// `Snapshot`: one coalesced refresh pass over `symbols`. Per-symbol
    /// failures are absent from the returned map rather than aborting the
    /// whole call.
    pub async fn snapshot(&self, symbols: &[String]) -> HashMap<String, MarketSnapshot> {
        let mut out = HashMap::new();
        for symbol in symbols {
            if let Some(snap) = self.fresh(symbol).await {
                out.insert(symbol.clone(), snap);
                continue;
            }
            let guard = self.singleflight_guard(symbol).await;
            let _permit = guard.lock().await;
            if let Some(snap) = self.fresh(symbol).await {
                out.insert(symbol.clone(), snap);
                continue;
            }
            match self.refresh_one(symbol).await {
                Ok(snap) => {
                    out.insert(symbol.clone(), snap);
                }
                Err(e) => {
                    warn!(symbol, error = %e, "market snapshot refresh failed for symbol");
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::mock::MockVenue;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn price_of_fetches_and_caches() {
        let venue = Arc::new(MockVenue::new());
        venue.set_price("BTCUSDT", dec!(100));
        let cache = SnapshotCache::new(venue.clone(), Duration::from_secs(60), "1h".into(), 60);

        let price = cache.price_of("BTCUSDT").await.unwrap();
        assert_eq!(price, dec!(100));

        venue.set_price("BTCUSDT", dec!(200));
        // Still within TTL, should return the cached value.
        let price2 = cache.price_of("BTCUSDT").await.unwrap();
        assert_eq!(price2, dec!(100));
    }

    #[tokio::test]
    async fn snapshot_skips_failed_symbols() {
        let venue = Arc::new(MockVenue::new());
        venue.set_price("BTCUSDT", dec!(100));
        let cache = SnapshotCache::new(venue, Duration::from_secs(60), "1h".into(), 60);

        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let result = cache.snapshot(&symbols).await;
        assert!(result.contains_key("BTCUSDT"));
        assert!(!result.contains_key("ETHUSDT"));
    }

    #[tokio::test]
    async fn indicators_absent_on_insufficient_history() {
        let venue = Arc::new(MockVenue::new());
        venue.set_price("BTCUSDT", dec!(100));
        let cache = SnapshotCache::new(venue, Duration::from_secs(60), "1h".into(), 5);
        let snap = cache.refresh_one("BTCUSDT").await.unwrap();
        assert!(snap.indicators.rsi14.is_none());
        assert!(snap.indicators.macd.is_none());
    }
}
