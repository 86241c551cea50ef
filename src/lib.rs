//! Futures-Lead Market Maker
//!
//! Decision core of a multi-pair market maker. Watches spot and futures prices
//! for every configured pair, detects futures moves that lead spot, ranks the
//! resulting opportunities, gates them through portfolio risk limits and fires
//! a time-boxed IOC order before the signal decays.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectors;
pub mod data;
pub mod orchestrator;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod trading;
pub mod utils;

// Re-export commonly used types
pub use config::MarketMakerConfig;
pub use connectors::{ExchangeGateway, PaperExchange};
pub use data::{DataCollector, OrderBook};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorEvent};
pub use persistence::{MemoryStore, SessionStore};
pub use risk::PortfolioRiskManager;
pub use strategy::{Opportunity, RankingEngine};
pub use trading::ExecutionEngine;

/// Result type used throughout the application
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the market maker
#[derive(thiserror::Error, Debug)]
pub enum MarketMakerError {
    /// Invalid or incomplete configuration; fatal at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `start()` could not bring the system up
    #[error("Startup failure: {0}")]
    Startup(String),

    /// A single pair's data could not be collected or computed
    #[error("Data error for {pair}: {reason}")]
    PairData {
        /// Trading pair the failure belongs to
        pair: String,
        /// What went wrong
        reason: String,
    },

    /// Exchange boundary call failed
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Persistence boundary call failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Structural validation of a record failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection to a boundary was lost or never established
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
