//! Exchange boundary trait and common types

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Exchange boundary consumed by the decision core.
///
/// Implementations own transport, authentication and symbol mapping. Futures
/// instruments are addressed with the unified `<pair>:<quote>` symbol.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Connect to the exchange
    async fn connect(&self) -> Result<()>;

    /// Disconnect from the exchange
    async fn disconnect(&self) -> Result<()>;

    /// Fetch account balances keyed by asset
    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>>;

    /// Fetch open positions held on the exchange
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>>;

    /// Get the latest ticker for a symbol
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    /// Submit an order
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Subscribe to pushed order book updates
    fn order_book_updates(&self) -> broadcast::Receiver<OrderBookUpdate>;
}

/// Account balance information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    /// Asset symbol
    pub asset: String,
    /// Available balance
    pub free: f64,
    /// Locked balance (in orders)
    pub locked: f64,
}

impl Balance {
    /// Get total balance (free + locked)
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

/// Position reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangePosition {
    /// Exchange-side identifier, if any
    pub id: Option<String>,
    /// Trading pair
    pub pair: String,
    /// Position side
    pub side: OrderSide,
    /// Size in base units
    pub size: f64,
    /// Average entry price
    pub entry_price: f64,
    /// Opening time in epoch milliseconds
    pub timestamp: i64,
}

/// Ticker snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    /// Symbol
    pub symbol: String,
    /// Best bid
    pub bid: Option<f64>,
    /// Best ask
    pub ask: Option<f64>,
    /// Last traded price
    pub last: f64,
    /// Exchange timestamp in epoch milliseconds
    pub timestamp: i64,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl OrderSide {
    /// +1 for buys (long), -1 for sells (short)
    pub fn direction(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Limit order
    Limit,
    /// Market order
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Canceled
    GTC,
    /// Immediate or Cancel
    IOC,
    /// Fill or Kill
    FOK,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::GTC => write!(f, "GTC"),
            TimeInForce::IOC => write!(f, "IOC"),
            TimeInForce::FOK => write!(f, "FOK"),
        }
    }
}

/// Order request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderRequest {
    /// Trading symbol
    pub symbol: String,
    /// Order side
    pub side: OrderSide,
    /// Order type
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Limit price
    pub price: f64,
    /// Quantity in base units
    pub amount: f64,
    /// Time in force
    pub time_in_force: TimeInForce,
}

/// Order acknowledgement returned by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAck {
    /// Exchange order ID; empty means the exchange did not assign one
    pub id: String,
    /// Order status
    pub status: OrderStatus,
    /// Price the order was accepted at
    pub price: f64,
    /// Quantity accepted
    pub amount: f64,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Order is open
    Open,
    /// Order is fully filled
    Closed,
    /// Order is canceled (IOC remainder)
    Canceled,
    /// Order is rejected
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Closed => write!(f, "closed"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Pushed order book update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderBookUpdate {
    /// Symbol
    pub symbol: String,
    /// Bid levels as `[price, quantity]`
    pub bids: Vec<[f64; 2]>,
    /// Ask levels as `[price, quantity]`
    pub asks: Vec<[f64; 2]>,
    /// Exchange timestamp in epoch milliseconds
    pub timestamp: i64,
}
