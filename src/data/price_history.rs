//! Bounded, time-ordered price buffer
//!
//! Spot (pushed) and futures (polled) prices land in the same structure so
//! movement and correlation math never cares where a sample came from.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Where a price sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    /// Mid price from a pushed spot order book
    SpotOrderBook,
    /// Last price from a polled futures ticker
    FuturesTicker,
}

/// A timestamped price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Price
    pub price: f64,
}

/// Fixed-capacity price buffer; the oldest sample is evicted when full.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    source: PriceSource,
    capacity: usize,
    points: VecDeque<PricePoint>,
}

impl PriceHistory {
    /// Create an empty buffer
    pub fn new(source: PriceSource, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            source,
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Source of the samples in this buffer
    pub fn source(&self) -> PriceSource {
        self.source
    }

    /// Append a sample. Non-positive prices and samples older than the
    /// newest one are ignored so the buffer stays time-ordered.
    pub fn push(&mut self, timestamp: i64, price: f64) -> bool {
        if !(price.is_finite() && price > 0.0) {
            return false;
        }
        if let Some(last) = self.points.back() {
            if timestamp < last.timestamp {
                return false;
            }
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(PricePoint { timestamp, price });
        true
    }

    /// Number of samples held
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Newest sample
    pub fn latest(&self) -> Option<PricePoint> {
        self.points.back().copied()
    }

    /// Percentage move from the first sample inside `[now - window_ms, now]`
    /// to the newest sample in that range. Zero when fewer than two samples
    /// fall in the window.
    pub fn movement(&self, now: i64, window_ms: i64) -> f64 {
        let start = now - window_ms;
        let mut in_window = self
            .points
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp <= now);

        let Some(first) = in_window.next() else {
            return 0.0;
        };
        let Some(last) = in_window.last() else {
            return 0.0;
        };

        (last.price - first.price) / first.price * 100.0
    }

    /// Consecutive-sample fractional returns over the newest `lookback` samples
    pub fn returns(&self, lookback: usize) -> Vec<f64> {
        let skip = self.points.len().saturating_sub(lookback);
        let prices: Vec<f64> = self.points.iter().skip(skip).map(|p| p.price).collect();
        prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
    }

    /// Copy of the samples, oldest first
    pub fn points(&self) -> Vec<PricePoint> {
        self.points.iter().copied().collect()
    }
}
