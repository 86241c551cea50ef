//! Settings management utilities

use crate::{MarketMakerError, Result};

/// Configuration validation utilities
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a pair in `BASE/QUOTE` form
    pub fn validate_pair(pair: &str) -> Result<()> {
        let mut parts = pair.split('/');
        let (base, quote) = match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => (base, quote),
            _ => {
                return Err(MarketMakerError::Configuration(format!(
                    "Pair '{}' must be in BASE/QUOTE form",
                    pair
                ))
                .into())
            }
        };

        let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(MarketMakerError::Configuration(format!(
                "Pair '{}' must contain only alphanumeric assets",
                pair
            ))
            .into());
        }

        Ok(())
    }

    /// Validate a fraction in (0.0, 1.0]
    pub fn validate_fraction(value: f64, name: &str) -> Result<()> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(MarketMakerError::Configuration(format!(
                "{} must be in (0.0, 1.0]",
                name
            ))
            .into());
        }
        Ok(())
    }

    /// Validate a positive value
    pub fn validate_positive(value: f64, name: &str) -> Result<()> {
        if !(value > 0.0) || !value.is_finite() {
            return Err(
                MarketMakerError::Configuration(format!("{} must be positive", name)).into(),
            );
        }
        Ok(())
    }

    /// Validate a finite value that is zero or greater
    pub fn validate_non_negative(value: f64, name: &str) -> Result<()> {
        if !(value >= 0.0) || !value.is_finite() {
            return Err(
                MarketMakerError::Configuration(format!("{} must not be negative", name)).into(),
            );
        }
        Ok(())
    }
}

/// Configuration defaults
pub struct ConfigDefaults;

impl ConfigDefaults {
    /// Default quote currency
    pub const QUOTE_CURRENCY: &'static str = "USD";

    /// Default fraction of the budget per position
    pub const POSITION_SIZE_FRACTION: f64 = 0.1;

    /// Default samples per price buffer
    pub const BUFFER_CAPACITY: usize = 1000;

    /// Default movement window in milliseconds
    pub const MOVEMENT_WINDOW_MS: i64 = 5_000;

    /// Default correlation lookback in samples
    pub const CORRELATION_LOOKBACK: usize = 300;

    /// Default liquidity band around mid (0.1%)
    pub const LIQUIDITY_BAND: f64 = 0.001;

    /// Default futures poll interval in milliseconds
    pub const FUTURES_POLL_INTERVAL_MS: u64 = 1_000;

    /// Default minimum futures movement in percent
    pub const MIN_FUTURES_MOVEMENT: f64 = 0.05;

    /// Default per-pair detection dedupe window in milliseconds
    pub const DEDUPE_WINDOW_MS: i64 = 5_000;

    /// Default opportunity expiry in milliseconds
    pub const OPPORTUNITY_TTL_MS: i64 = 30_000;

    /// Default minimum final score
    pub const MIN_OPPORTUNITY_SCORE: f64 = 65.0;

    /// Default maximum open positions
    pub const MAX_CONCURRENT_POSITIONS: usize = 10;

    /// Default minimum position value in USD
    pub const MIN_POSITION_SIZE_USD: f64 = 50.0;

    /// Default maximum aggregate exposure
    pub const MAX_PORTFOLIO_EXPOSURE: f64 = 0.80;

    /// Default maximum exposure per pair
    pub const MAX_PAIR_EXPOSURE: f64 = 0.20;

    /// Default maximum execution delay in milliseconds
    pub const MAX_EXECUTION_DELAY_MS: i64 = 3_000;

    /// Default per-pair execution cooldown in milliseconds
    pub const MIN_TIME_BETWEEN_EXECUTIONS_MS: i64 = 5_000;

    /// Default price offset applied to IOC limit orders (0.01%)
    pub const PRICE_OFFSET: f64 = 0.0001;

    /// Default cooldown map capacity
    pub const COOLDOWN_MAP_CAPACITY: usize = 100;

    /// Default cooldown sweep interval in milliseconds
    pub const COOLDOWN_SWEEP_INTERVAL_MS: i64 = 60_000;

    /// Default main loop interval in milliseconds
    pub const MAIN_LOOP_INTERVAL_MS: u64 = 2_000;

    /// Default performance snapshot interval in milliseconds
    pub const PERFORMANCE_INTERVAL_MS: u64 = 30_000;

    /// Default correlation refresh interval in milliseconds
    pub const CORRELATION_INTERVAL_MS: u64 = 60_000;
}
