//! Opportunity records

use crate::{connectors::OrderSide, data::PairSnapshot, MarketMakerError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lead-time signal carried by an opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Side to trade on spot
    pub direction: OrderSide,
    /// Futures movement over the window in percent (signed)
    pub magnitude_percent: f64,
    /// Futures (leading) price
    pub leading_market_price: f64,
    /// Spot (lagging) mid price
    pub lagging_market_price: f64,
    /// Futures premium over spot in percent (signed)
    pub spread_percent: f64,
}

/// Market state captured at detection time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Spot best bid
    pub spot_bid: f64,
    /// Spot best ask
    pub spot_ask: f64,
    /// Futures best bid (last price if the ticker had none)
    pub futures_bid: f64,
    /// Futures best ask (last price if the ticker had none)
    pub futures_ask: f64,
    /// Spot liquidity near mid in USD
    pub spot_liquidity_usd: f64,
}

/// A detected, time-decaying trade candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Unique identifier
    pub id: String,
    /// Trading pair
    pub pair: String,
    /// Detection time in epoch milliseconds
    pub detected_at: i64,
    /// Signal
    pub signal: Signal,
    /// Market snapshot
    pub market_snapshot: MarketSnapshot,
    /// Expected time for spot to catch up, in milliseconds
    pub expected_lead_time_ms: i64,
}

impl Opportunity {
    /// Build a validated opportunity
    pub fn new(
        pair: impl Into<String>,
        detected_at: i64,
        signal: Signal,
        market_snapshot: MarketSnapshot,
    ) -> Result<Self, MarketMakerError> {
        let expected_lead_time_ms = expected_lead_time_ms(signal.magnitude_percent);
        let opportunity = Self {
            id: Uuid::new_v4().to_string(),
            pair: pair.into(),
            detected_at,
            signal,
            market_snapshot,
            expected_lead_time_ms,
        };
        opportunity.validate()?;
        Ok(opportunity)
    }

    /// Derive an opportunity from a pair snapshot. Futures up means buy spot.
    pub fn from_snapshot(snapshot: &PairSnapshot, detected_at: i64) -> Result<Self, MarketMakerError> {
        let direction = if snapshot.futures_movement >= 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };

        let futures_price = snapshot.futures.price;
        let spot_mid = snapshot.spot.mid;
        let spread_percent = if spot_mid > 0.0 {
            (futures_price - spot_mid) / spot_mid * 100.0
        } else {
            0.0
        };

        let signal = Signal {
            direction,
            magnitude_percent: snapshot.futures_movement,
            leading_market_price: futures_price,
            lagging_market_price: spot_mid,
            spread_percent,
        };

        let market_snapshot = MarketSnapshot {
            spot_bid: snapshot.spot.best_bid,
            spot_ask: snapshot.spot.best_ask,
            futures_bid: snapshot.futures.bid.unwrap_or(futures_price),
            futures_ask: snapshot.futures.ask.unwrap_or(futures_price),
            spot_liquidity_usd: snapshot.spot.liquidity_usd,
        };

        Self::new(snapshot.pair.clone(), detected_at, signal, market_snapshot)
    }

    /// Structural validation
    pub fn validate(&self) -> Result<(), MarketMakerError> {
        let invalid = |reason: &str| {
            MarketMakerError::Validation(format!("opportunity {} ({}): {}", self.id, self.pair, reason))
        };

        if self.id.is_empty() {
            return Err(invalid("missing id"));
        }
        if self.pair.is_empty() {
            return Err(invalid("missing pair"));
        }
        if self.detected_at <= 0 {
            return Err(invalid("missing detection time"));
        }

        let signal = &self.signal;
        if !signal.magnitude_percent.is_finite() || !signal.spread_percent.is_finite() {
            return Err(invalid("non-finite signal"));
        }
        if !(signal.leading_market_price > 0.0 && signal.lagging_market_price > 0.0) {
            return Err(invalid("non-positive signal prices"));
        }

        let market = &self.market_snapshot;
        if !(market.spot_bid > 0.0 && market.spot_ask > 0.0) {
            return Err(invalid("non-positive spot quote"));
        }
        if market.spot_bid > market.spot_ask {
            return Err(invalid("crossed spot quote"));
        }
        if !(market.spot_liquidity_usd >= 0.0) {
            return Err(invalid("invalid liquidity estimate"));
        }

        if self.expected_lead_time_ms <= 0 {
            return Err(invalid("non-positive expected lead time"));
        }

        Ok(())
    }

    /// Milliseconds since detection
    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.detected_at
    }

    /// Price the opportunity would enter at: ask for buys, bid for sells
    pub fn entry_price(&self) -> f64 {
        match self.signal.direction {
            OrderSide::Buy => self.market_snapshot.spot_ask,
            OrderSide::Sell => self.market_snapshot.spot_bid,
        }
    }
}

/// Heuristic catch-up time: larger futures moves take longer to propagate
/// to spot. 1s base plus 2s per percent, capped at 5s.
pub fn expected_lead_time_ms(magnitude_percent: f64) -> i64 {
    let magnitude = if magnitude_percent.is_finite() {
        magnitude_percent.abs()
    } else {
        0.0
    };
    (1_000.0 + magnitude * 2_000.0).clamp(1_000.0, 5_000.0).round() as i64
}
