//! Multi-pair market data collector
//!
//! Owns the per-pair spot and futures price buffers and the cached
//! correlation matrix. Buffers are written by the order book listener and the
//! futures poller and read by the main loop; every read hands out a copy.

use super::orderbook::OrderBook;
use super::price_history::{PriceHistory, PriceSource};
use crate::{
    config::DataConfig,
    connectors::{futures_symbol, ExchangeGateway, OrderBookUpdate, Ticker},
    MarketMakerError, Result,
};
use dashmap::DashMap;
use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

/// Spot side of a pair snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    /// Best bid
    pub best_bid: f64,
    /// Best ask
    pub best_ask: f64,
    /// Mid price
    pub mid: f64,
    /// Quote notional within the liquidity band around mid
    pub liquidity_usd: f64,
    /// Book timestamp in epoch milliseconds
    pub timestamp: i64,
}

/// Futures side of a pair snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuturesQuote {
    /// Last price
    pub price: f64,
    /// Best bid, if the ticker carried one
    pub bid: Option<f64>,
    /// Best ask, if the ticker carried one
    pub ask: Option<f64>,
    /// Sample timestamp in epoch milliseconds
    pub timestamp: i64,
}

/// Point-in-time view of one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSnapshot {
    /// Trading pair
    pub pair: String,
    /// Spot quote
    pub spot: SpotQuote,
    /// Futures quote
    pub futures: FuturesQuote,
    /// Futures movement over the window in percent
    pub futures_movement: f64,
    /// Spot movement over the window in percent
    pub spot_movement: f64,
    /// Snapshot time in epoch milliseconds
    pub timestamp: i64,
}

/// Result of a collection pass: successful snapshots plus per-pair failures
#[derive(Debug, Default)]
pub struct CollectionResult {
    /// Snapshots in configured pair order
    pub snapshots: IndexMap<String, PairSnapshot>,
    /// Pairs that could not be snapshotted this pass
    pub errors: Vec<MarketMakerError>,
}

#[derive(Debug, Clone)]
struct PairMarketData {
    spot: PriceHistory,
    futures: PriceHistory,
    order_book: Option<OrderBook>,
    futures_ticker: Option<Ticker>,
}

impl PairMarketData {
    fn new(capacity: usize) -> Self {
        Self {
            spot: PriceHistory::new(PriceSource::SpotOrderBook, capacity),
            futures: PriceHistory::new(PriceSource::FuturesTicker, capacity),
            order_book: None,
            futures_ticker: None,
        }
    }
}

/// Per-pair price history and correlation owner
pub struct DataCollector {
    pairs: Vec<String>,
    quote_currency: String,
    config: DataConfig,
    markets: DashMap<String, PairMarketData>,
    correlations: RwLock<IndexMap<String, f64>>,
}

impl DataCollector {
    /// Create a collector for the given pairs
    pub fn new(pairs: Vec<String>, quote_currency: impl Into<String>, config: DataConfig) -> Self {
        let markets = DashMap::new();
        for pair in &pairs {
            markets.insert(pair.clone(), PairMarketData::new(config.buffer_capacity));
        }

        Self {
            pairs,
            quote_currency: quote_currency.into(),
            config,
            markets,
            correlations: RwLock::new(IndexMap::new()),
        }
    }

    /// Watched pairs in configured order
    pub fn pairs(&self) -> &[String] {
        &self.pairs
    }

    /// Ingest a pushed spot order book. Returns false for unknown symbols or
    /// books without a two-sided quote.
    pub fn on_order_book_update(&self, update: &OrderBookUpdate) -> bool {
        let Some(mut market) = self.markets.get_mut(&update.symbol) else {
            trace!(symbol = %update.symbol, "Ignoring order book for unwatched symbol");
            return false;
        };

        if let Some(current) = &market.order_book {
            if update.timestamp < current.timestamp() {
                trace!(symbol = %update.symbol, "Ignoring stale order book");
                return false;
            }
        }

        let book = OrderBook::from_update(update);
        let accepted = match book.mid_price() {
            Some(mid) => market.spot.push(update.timestamp, mid),
            None => false,
        };
        market.order_book = Some(book);
        accepted
    }

    /// Record a polled futures ticker for a pair
    pub fn record_futures_ticker(&self, pair: &str, ticker: Ticker) -> Result<()> {
        let mut market = self.markets.get_mut(pair).ok_or_else(|| MarketMakerError::PairData {
            pair: pair.to_string(),
            reason: "pair is not watched".to_string(),
        })?;

        market.futures.push(ticker.timestamp, ticker.last);
        market.futures_ticker = Some(ticker);
        Ok(())
    }

    /// Record a bare futures price sample for a pair
    pub fn record_futures_price(&self, pair: &str, price: f64, timestamp: i64) -> Result<()> {
        self.record_futures_ticker(
            pair,
            Ticker {
                symbol: futures_symbol(pair, &self.quote_currency),
                bid: None,
                ask: None,
                last: price,
                timestamp,
            },
        )
    }

    /// Poll the futures ticker of every pair. Failures are returned per pair
    /// and never stop the other pairs from being recorded.
    pub async fn poll_futures(&self, exchange: &dyn ExchangeGateway, now: i64) -> Vec<MarketMakerError> {
        let requests = self.pairs.iter().map(|pair| {
            let symbol = futures_symbol(pair, &self.quote_currency);
            async move { (pair, exchange.get_ticker(&symbol).await) }
        });

        let mut errors = Vec::new();
        for (pair, result) in join_all(requests).await {
            let outcome = result.and_then(|mut ticker| {
                // Local receive time keeps futures and spot on one clock
                ticker.timestamp = now;
                self.record_futures_ticker(pair, ticker)
            });
            if let Err(e) = outcome {
                debug!(pair = %pair, error = %e, "Futures poll failed");
                errors.push(MarketMakerError::PairData {
                    pair: pair.clone(),
                    reason: format!("futures ticker: {}", e),
                });
            }
        }
        errors
    }

    /// Futures movement in percent over the configured window ending at `now`
    pub fn calculate_futures_movement(&self, pair: &str, now: i64) -> Result<f64> {
        let market = self.market(pair)?;
        Ok(market.futures.movement(now, self.config.movement_window_ms))
    }

    /// Spot movement in percent over the configured window ending at `now`
    pub fn calculate_spot_movement(&self, pair: &str, now: i64) -> Result<f64> {
        let market = self.market(pair)?;
        Ok(market.spot.movement(now, self.config.movement_window_ms))
    }

    /// Copy of a pair's spot buffer
    pub fn spot_history(&self, pair: &str) -> Option<PriceHistory> {
        self.markets.get(pair).map(|m| m.spot.clone())
    }

    /// Copy of a pair's futures buffer
    pub fn futures_history(&self, pair: &str) -> Option<PriceHistory> {
        self.markets.get(pair).map(|m| m.futures.clone())
    }

    /// Snapshot every pair. A pair without usable data is reported in
    /// `errors` and left out of `snapshots`.
    pub fn collect_all_data(&self, now: i64) -> CollectionResult {
        let mut result = CollectionResult::default();

        for pair in &self.pairs {
            match self.snapshot(pair, now) {
                Ok(snapshot) => {
                    result.snapshots.insert(pair.clone(), snapshot);
                }
                Err(e) => result.errors.push(e),
            }
        }

        result
    }

    fn snapshot(&self, pair: &str, now: i64) -> std::result::Result<PairSnapshot, MarketMakerError> {
        let pair_error = |reason: &str| MarketMakerError::PairData {
            pair: pair.to_string(),
            reason: reason.to_string(),
        };

        // Copy out so the entry lock is released before any math
        let market = self
            .markets
            .get(pair)
            .map(|m| m.value().clone())
            .ok_or_else(|| pair_error("pair is not watched"))?;

        let book = market
            .order_book
            .as_ref()
            .ok_or_else(|| pair_error("no spot order book yet"))?;
        let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask >= bid => (bid, ask),
            _ => return Err(pair_error("spot book has no valid two-sided quote")),
        };

        let futures_point = market
            .futures
            .latest()
            .ok_or_else(|| pair_error("no futures price yet"))?;
        let (futures_bid, futures_ask) = market
            .futures_ticker
            .as_ref()
            .map(|t| (t.bid, t.ask))
            .unwrap_or((None, None));

        Ok(PairSnapshot {
            pair: pair.to_string(),
            spot: SpotQuote {
                best_bid,
                best_ask,
                mid: (best_bid + best_ask) / 2.0,
                liquidity_usd: book.liquidity_within(self.config.liquidity_band),
                timestamp: book.timestamp(),
            },
            futures: FuturesQuote {
                price: futures_point.price,
                bid: futures_bid,
                ask: futures_ask,
                timestamp: futures_point.timestamp,
            },
            futures_movement: market.futures.movement(now, self.config.movement_window_ms),
            spot_movement: market.spot.movement(now, self.config.movement_window_ms),
            timestamp: now,
        })
    }

    /// Pearson correlation of spot returns for every unordered pair
    /// combination, keyed `"A:B"` in configured order.
    pub fn calculate_correlations(&self) -> IndexMap<String, f64> {
        let returns: Vec<(String, Vec<f64>)> = self
            .pairs
            .iter()
            .map(|pair| {
                let series = self
                    .markets
                    .get(pair)
                    .map(|m| m.spot.returns(self.config.correlation_lookback))
                    .unwrap_or_default();
                (pair.clone(), series)
            })
            .collect();

        let mut correlations = IndexMap::new();
        for (i, (pair_a, returns_a)) in returns.iter().enumerate() {
            for (pair_b, returns_b) in returns.iter().skip(i + 1) {
                let key = correlation_key(pair_a, pair_b);
                correlations.insert(key, pearson(returns_a, returns_b));
            }
        }
        correlations
    }

    /// Recompute and cache the correlation matrix
    pub async fn refresh_correlations(&self) -> IndexMap<String, f64> {
        let correlations = self.calculate_correlations();
        *self.correlations.write().await = correlations.clone();
        correlations
    }

    /// Cached correlation matrix from the last refresh
    pub async fn correlations(&self) -> IndexMap<String, f64> {
        self.correlations.read().await.clone()
    }

    fn market(&self, pair: &str) -> Result<PairMarketData> {
        self.markets
            .get(pair)
            .map(|m| m.value().clone())
            .ok_or_else(|| {
                warn!(pair = %pair, "Requested data for unwatched pair");
                MarketMakerError::PairData {
                    pair: pair.to_string(),
                    reason: "pair is not watched".to_string(),
                }
                .into()
            })
    }
}

/// Correlation matrix key for two pairs
pub fn correlation_key(pair_a: &str, pair_b: &str) -> String {
    format!("{}:{}", pair_a, pair_b)
}

/// Look up a correlation regardless of key order
pub fn lookup_correlation(correlations: &IndexMap<String, f64>, pair_a: &str, pair_b: &str) -> Option<f64> {
    correlations
        .get(&correlation_key(pair_a, pair_b))
        .or_else(|| correlations.get(&correlation_key(pair_b, pair_a)))
        .copied()
}

/// Pearson coefficient of two series aligned on their newest values.
/// Zero when fewer than two aligned samples exist or either series is flat.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    use statrs::statistics::Statistics;

    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let sd_a = a.iter().std_dev();
    let sd_b = b.iter().std_dev();
    if !(sd_a > 0.0 && sd_b > 0.0) {
        return 0.0;
    }

    let correlation = a.iter().covariance(b.iter()) / (sd_a * sd_b);
    if correlation.is_finite() {
        correlation.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
