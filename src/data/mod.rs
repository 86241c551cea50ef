//! Market data: order books, price buffers and the multi-pair collector

pub mod collector;
pub mod orderbook;
pub mod price_history;

pub use collector::{
    correlation_key, lookup_correlation, pearson, CollectionResult, DataCollector, FuturesQuote,
    PairSnapshot, SpotQuote,
};
pub use orderbook::{OrderBook, PriceLevel};
pub use price_history::{PriceHistory, PricePoint, PriceSource};
