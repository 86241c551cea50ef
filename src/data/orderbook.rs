//! Order book snapshot

use crate::connectors::OrderBookUpdate;
use serde::{Deserialize, Serialize};

/// A price level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price
    pub price: f64,
    /// Quantity in base units
    pub quantity: f64,
}

/// Order book snapshot. Bids are kept descending, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Symbol
    pub symbol: String,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    timestamp: i64,
}

impl OrderBook {
    /// Create an empty order book
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: 0,
        }
    }

    /// Build a book from a pushed update, dropping non-positive levels
    pub fn from_update(update: &OrderBookUpdate) -> Self {
        let mut book = Self::new(update.symbol.clone());
        for [price, quantity] in &update.bids {
            book.update_bid(*price, *quantity);
        }
        for [price, quantity] in &update.asks {
            book.update_ask(*price, *quantity);
        }
        book.set_timestamp(update.timestamp);
        book
    }

    /// Set, replace or (with zero quantity) remove a bid level
    pub fn update_bid(&mut self, price: f64, quantity: f64) {
        Self::update_side(&mut self.bids, price, quantity, |a, b| b.total_cmp(&a));
    }

    /// Set, replace or (with zero quantity) remove an ask level
    pub fn update_ask(&mut self, price: f64, quantity: f64) {
        Self::update_side(&mut self.asks, price, quantity, |a, b| a.total_cmp(&b));
    }

    fn update_side<F>(levels: &mut Vec<PriceLevel>, price: f64, quantity: f64, order: F)
    where
        F: Fn(f64, f64) -> std::cmp::Ordering,
    {
        if !(price.is_finite() && price > 0.0) {
            return;
        }
        levels.retain(|l| l.price != price);
        if quantity > 0.0 && quantity.is_finite() {
            let idx = levels.partition_point(|l| order(l.price, price).is_lt());
            levels.insert(idx, PriceLevel { price, quantity });
        }
    }

    /// Set the book timestamp in epoch milliseconds
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// Book timestamp in epoch milliseconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Best bid price
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Quantity at the best bid
    pub fn best_bid_quantity(&self) -> Option<f64> {
        self.bids.first().map(|l| l.quantity)
    }

    /// Quantity at the best ask
    pub fn best_ask_quantity(&self) -> Option<f64> {
        self.asks.first().map(|l| l.quantity)
    }

    /// Mid price
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Bid levels, best first
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Ask levels, best first
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Quote notional resting within `band` (0.001 = 0.1%) of mid on both sides
    pub fn liquidity_within(&self, band: f64) -> f64 {
        let Some(mid) = self.mid_price() else {
            return 0.0;
        };
        let floor = mid * (1.0 - band);
        let ceiling = mid * (1.0 + band);

        let bid_notional: f64 = self
            .bids
            .iter()
            .take_while(|l| l.price >= floor)
            .map(|l| l.price * l.quantity)
            .sum();
        let ask_notional: f64 = self
            .asks
            .iter()
            .take_while(|l| l.price <= ceiling)
            .map(|l| l.price * l.quantity)
            .sum();

        bid_notional + ask_notional
    }
}
