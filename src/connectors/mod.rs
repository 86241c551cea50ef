//! Exchange boundary and connector implementations

pub mod paper;
pub mod traits;

pub use paper::{PaperExchange, PaperExchangeConfig};
pub use traits::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Disconnected
    Disconnected,
    /// Connected
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Unified futures symbol for a spot pair, e.g. `BTC/USD` -> `BTC/USD:USD`
pub fn futures_symbol(pair: &str, quote_currency: &str) -> String {
    format!("{}:{}", pair, quote_currency)
}

/// Base asset of a `BASE/QUOTE` pair
pub fn base_asset(pair: &str) -> &str {
    pair.split('/').next().unwrap_or(pair)
}
