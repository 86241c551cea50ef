//! Portfolio admission control and exposure accounting
//!
//! `PortfolioRiskManager` is the single owner of positions and exposure.
//! Admission and insertion both take `&self`/`&mut self` on the same value,
//! so a caller holding the manager cannot interleave another insertion
//! between `can_take_position` and `add_position`.

use crate::{
    config::RiskConfig,
    connectors::{Balance, ExchangePosition, OrderSide},
};
use indexmap::IndexMap;
use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// Residual exposure below this is treated as zero after a close
const EXPOSURE_EPSILON: f64 = 1e-9;

/// Position lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Open and counted in exposure
    Open,
    /// Closed, P&L realised
    Closed,
}

/// A position held by the portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier
    pub id: String,
    /// Trading pair
    pub pair: String,
    /// Long (buy) or short (sell)
    pub side: OrderSide,
    /// Base asset quantity
    pub size: f64,
    /// Entry price
    pub entry_price: f64,
    /// Entry time in epoch milliseconds
    pub entry_time: i64,
    /// Lifecycle status
    pub status: PositionStatus,
    /// Unrealised P&L at the last mark
    pub unrealized_pnl: f64,
    /// Realised P&L once closed
    pub realized_pnl: f64,
}

impl Position {
    /// Create an open position with a fresh id
    pub fn new(pair: impl Into<String>, side: OrderSide, size: f64, entry_price: f64, entry_time: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pair: pair.into(),
            side,
            size,
            entry_price,
            entry_time,
            status: PositionStatus::Open,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        }
    }

    /// Notional at entry
    pub fn value(&self) -> f64 {
        self.size * self.entry_price
    }
}

/// Unrealised P&L of a position at a price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnL {
    /// Absolute P&L in quote currency
    pub unrealized_pnl: f64,
    /// P&L relative to entry notional, in percent
    pub percent: f64,
}

/// Closed-trade record for one pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PairTradeStats {
    /// Trades closed with positive P&L
    pub wins: u32,
    /// Trades closed with zero or negative P&L
    pub losses: u32,
}

impl PairTradeStats {
    /// Fraction of winning trades, `None` without history
    pub fn win_rate(&self) -> Option<f64> {
        let total = self.wins + self.losses;
        (total > 0).then(|| self.wins as f64 / total as f64)
    }
}

/// Why a position was not admitted
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionRejection {
    /// Size or price not positive and finite
    InvalidInput,
    /// Open-position count already at the limit
    MaxConcurrentPositions {
        /// Open positions
        open: usize,
        /// Configured limit
        limit: usize,
    },
    /// Position value below the configured minimum
    BelowMinimumSize {
        /// Requested value
        value: f64,
        /// Configured minimum
        minimum: f64,
    },
    /// Aggregate exposure would exceed the portfolio limit
    PortfolioExposure {
        /// Exposure after admission
        projected: f64,
        /// Budget times the portfolio fraction
        limit: f64,
    },
    /// Pair exposure would exceed the per-pair limit
    PairExposure {
        /// Pair exposure after admission
        projected: f64,
        /// Budget times the pair fraction
        limit: f64,
    },
}

impl AdmissionRejection {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionRejection::InvalidInput => "invalid_input",
            AdmissionRejection::MaxConcurrentPositions { .. } => "max_concurrent_positions",
            AdmissionRejection::BelowMinimumSize { .. } => "below_minimum_size",
            AdmissionRejection::PortfolioExposure { .. } => "portfolio_exposure",
            AdmissionRejection::PairExposure { .. } => "pair_exposure",
        }
    }
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionRejection::InvalidInput => write!(f, "invalid size or price"),
            AdmissionRejection::MaxConcurrentPositions { open, limit } => {
                write!(f, "{} open positions, limit {}", open, limit)
            }
            AdmissionRejection::BelowMinimumSize { value, minimum } => {
                write!(f, "value {:.2} below minimum {:.2}", value, minimum)
            }
            AdmissionRejection::PortfolioExposure { projected, limit } => {
                write!(f, "portfolio exposure {:.2} exceeds {:.2}", projected, limit)
            }
            AdmissionRejection::PairExposure { projected, limit } => {
                write!(f, "pair exposure {:.2} exceeds {:.2}", projected, limit)
            }
        }
    }
}

/// Read-only copy of the portfolio handed to ranking and reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Total budget in quote currency
    pub total_budget: f64,
    /// Entry notional of open positions per pair
    pub exposure_by_pair: IndexMap<String, f64>,
    /// Open positions by id
    pub positions: IndexMap<String, Position>,
    /// Latest pair correlations keyed `"A:B"`
    pub correlations: IndexMap<String, f64>,
    /// Closed-trade history per pair
    pub pair_history: HashMap<String, PairTradeStats>,
}

impl PortfolioState {
    /// Aggregate exposure
    pub fn total_exposure(&self) -> f64 {
        self.exposure_by_pair.values().sum()
    }

    /// Whether an open position exists on the pair
    pub fn has_position_in(&self, pair: &str) -> bool {
        self.positions.values().any(|p| p.pair == pair)
    }

    /// Distinct pairs with open positions, in insertion order
    pub fn held_pairs(&self) -> Vec<&str> {
        let mut pairs: Vec<&str> = Vec::new();
        for position in self.positions.values() {
            if !pairs.contains(&position.pair.as_str()) {
                pairs.push(position.pair.as_str());
            }
        }
        pairs
    }
}

/// Owner of positions, exposure and per-pair trade history
#[derive(Debug)]
pub struct PortfolioRiskManager {
    config: RiskConfig,
    total_budget: f64,
    quote_currency: String,
    positions: IndexMap<String, Position>,
    exposure_by_pair: IndexMap<String, f64>,
    correlations: IndexMap<String, f64>,
    pair_history: HashMap<String, PairTradeStats>,
    realized_pnl: f64,
}

impl PortfolioRiskManager {
    /// Create an empty portfolio
    pub fn new(total_budget: f64, quote_currency: impl Into<String>, config: RiskConfig) -> Self {
        Self {
            config,
            total_budget,
            quote_currency: quote_currency.into(),
            positions: IndexMap::new(),
            exposure_by_pair: IndexMap::new(),
            correlations: IndexMap::new(),
            pair_history: HashMap::new(),
            realized_pnl: 0.0,
        }
    }

    /// Run the admission checks in order and report the first failure
    pub fn check_admission(&self, pair: &str, size: f64, price: f64) -> Result<(), AdmissionRejection> {
        if !(size.is_finite() && size > 0.0 && price.is_finite() && price > 0.0) {
            return Err(AdmissionRejection::InvalidInput);
        }

        let open = self.positions.len();
        if open >= self.config.max_concurrent_positions {
            return Err(AdmissionRejection::MaxConcurrentPositions {
                open,
                limit: self.config.max_concurrent_positions,
            });
        }

        let value = size * price;
        if value < self.config.min_position_size_usd {
            return Err(AdmissionRejection::BelowMinimumSize {
                value,
                minimum: self.config.min_position_size_usd,
            });
        }

        let portfolio_limit = self.total_budget * self.config.max_portfolio_exposure;
        let projected = self.total_exposure() + value;
        if projected > portfolio_limit {
            return Err(AdmissionRejection::PortfolioExposure {
                projected,
                limit: portfolio_limit,
            });
        }

        let pair_limit = self.total_budget * self.config.max_pair_exposure;
        let projected = self.pair_exposure(pair) + value;
        if projected > pair_limit {
            return Err(AdmissionRejection::PairExposure {
                projected,
                limit: pair_limit,
            });
        }

        Ok(())
    }

    /// Whether a position of `size` at `price` on `pair` would be admitted
    pub fn can_take_position(&self, pair: &str, size: f64, price: f64) -> bool {
        match self.check_admission(pair, size, price) {
            Ok(()) => true,
            Err(rejection) => {
                crate::log_risk!(
                    debug,
                    rejection.kind(),
                    size * price,
                    self.total_budget,
                    pair = %pair,
                    reason = %rejection,
                    "Position not admitted"
                );
                false
            }
        }
    }

    /// Insert a position and book its exposure. Callers are expected to
    /// have checked admission first; see `try_add_position`.
    pub fn add_position(&mut self, position: Position) -> String {
        let id = position.id.clone();
        *self.exposure_by_pair.entry(position.pair.clone()).or_insert(0.0) += position.value();

        info!(
            position_id = %id,
            pair = %position.pair,
            side = %position.side,
            size = position.size,
            entry_price = position.entry_price,
            "Position opened"
        );

        self.positions.insert(id.clone(), position);
        self.publish_gauges();
        id
    }

    /// Admission check and insertion in one step
    pub fn try_add_position(&mut self, position: Position) -> Result<String, AdmissionRejection> {
        self.check_admission(&position.pair, position.size, position.entry_price)?;
        Ok(self.add_position(position))
    }

    /// Copy of the current state
    pub fn get_portfolio_state(&self) -> PortfolioState {
        PortfolioState {
            total_budget: self.total_budget,
            exposure_by_pair: self.exposure_by_pair.clone(),
            positions: self.positions.clone(),
            correlations: self.correlations.clone(),
            pair_history: self.pair_history.clone(),
        }
    }

    /// Unrealised P&L at `current_price`; +1 direction for longs, -1 for shorts
    pub fn calculate_pnl(position: &Position, current_price: f64) -> PnL {
        let unrealized_pnl = (current_price - position.entry_price) * position.side.direction() * position.size;
        let value = position.value();
        let percent = if value > 0.0 {
            unrealized_pnl / value * 100.0
        } else {
            0.0
        };
        PnL { unrealized_pnl, percent }
    }

    /// Seed positions already held on the exchange. These bypass admission.
    pub fn prime(&mut self, balances: &HashMap<String, Balance>, positions: &[ExchangePosition]) {
        match balances.get(&self.quote_currency) {
            Some(balance) => {
                info!(
                    asset = %balance.asset,
                    free = balance.free,
                    locked = balance.locked,
                    budget = self.total_budget,
                    "Quote balance at startup"
                );
                if balance.total() < self.total_budget {
                    warn!(
                        asset = %balance.asset,
                        total = balance.total(),
                        budget = self.total_budget,
                        "Quote balance is below the configured budget"
                    );
                }
            }
            None => warn!(asset = %self.quote_currency, "No quote balance reported by exchange"),
        }

        for existing in positions {
            if !(existing.size > 0.0 && existing.entry_price > 0.0) {
                warn!(pair = %existing.pair, "Skipping exchange position with invalid size or price");
                continue;
            }
            let mut position = Position::new(
                existing.pair.clone(),
                existing.side,
                existing.size,
                existing.entry_price,
                existing.timestamp,
            );
            if let Some(id) = &existing.id {
                position.id = id.clone();
            }
            self.add_position(position);
        }

        info!(
            positions = self.positions.len(),
            exposure = self.total_exposure(),
            "Portfolio primed"
        );
    }

    /// Close a position, realise its P&L and record the outcome for the pair.
    /// Returns the closed position, or `None` if the id is unknown.
    pub fn close_position(&mut self, id: &str, exit_price: f64, now: i64) -> Option<Position> {
        let mut position = self.positions.shift_remove(id)?;

        let pnl = Self::calculate_pnl(&position, exit_price);
        position.status = PositionStatus::Closed;
        position.unrealized_pnl = 0.0;
        position.realized_pnl = pnl.unrealized_pnl;
        self.realized_pnl += pnl.unrealized_pnl;

        if let Some(exposure) = self.exposure_by_pair.get_mut(&position.pair) {
            *exposure -= position.value();
            if *exposure <= EXPOSURE_EPSILON {
                self.exposure_by_pair.shift_remove(&position.pair);
            }
        }

        let stats = self.pair_history.entry(position.pair.clone()).or_default();
        if pnl.unrealized_pnl > 0.0 {
            stats.wins += 1;
        } else {
            stats.losses += 1;
        }

        info!(
            position_id = %position.id,
            pair = %position.pair,
            exit_price,
            realized_pnl = pnl.unrealized_pnl,
            held_ms = now - position.entry_time,
            "Position closed"
        );

        self.publish_gauges();
        Some(position)
    }

    /// Refresh unrealised P&L from the latest prices
    pub fn mark_to_market(&mut self, prices: &IndexMap<String, f64>) {
        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(&position.pair) {
                position.unrealized_pnl = Self::calculate_pnl(position, *price).unrealized_pnl;
            }
        }
    }

    /// Replace the correlation matrix used by ranking
    pub fn set_correlations(&mut self, correlations: IndexMap<String, f64>) {
        self.correlations = correlations;
    }

    /// Exposure booked against a pair
    pub fn pair_exposure(&self, pair: &str) -> f64 {
        self.exposure_by_pair.get(pair).copied().unwrap_or(0.0)
    }

    /// Aggregate exposure
    pub fn total_exposure(&self) -> f64 {
        self.exposure_by_pair.values().sum()
    }

    /// Number of open positions
    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Open positions in insertion order
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// P&L realised by closed positions
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Sum of unrealised P&L at the last mark
    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    /// Total budget
    pub fn total_budget(&self) -> f64 {
        self.total_budget
    }

    fn publish_gauges(&self) {
        gauge!("mm_portfolio_exposure_usd", self.total_exposure());
        gauge!("mm_open_positions", self.positions.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manager(budget: f64) -> PortfolioRiskManager {
        PortfolioRiskManager::new(budget, "USD", RiskConfig::default())
    }

    #[test]
    fn test_pair_exposure_limit() {
        let mut risk = manager(1_000.0);
        risk.add_position(Position::new("BTC/USD", OrderSide::Buy, 0.003, 50_000.0, 1));
        assert!((risk.pair_exposure("BTC/USD") - 150.0).abs() < 1e-9);

        // 150 + 60 = 210 > 200
        match risk.check_admission("BTC/USD", 0.0012, 50_000.0) {
            Err(AdmissionRejection::PairExposure { projected, limit }) => {
                assert!((projected - 210.0).abs() < 1e-6);
                assert!((limit - 200.0).abs() < 1e-9);
            }
            other => panic!("expected pair exposure rejection, got {:?}", other),
        }
        assert!(!risk.can_take_position("BTC/USD", 0.0012, 50_000.0));

        // Another pair is unaffected
        assert!(risk.can_take_position("ETH/USD", 0.02, 3_000.0));
    }

    #[test]
    fn test_admission_order() {
        let config = RiskConfig {
            max_concurrent_positions: 1,
            ..RiskConfig::default()
        };
        let mut risk = PortfolioRiskManager::new(1_000.0, "USD", config);
        assert!(matches!(
            risk.check_admission("BTC/USD", 0.0001, 50_000.0),
            Err(AdmissionRejection::BelowMinimumSize { .. })
        ));
        assert_eq!(risk.check_admission("BTC/USD", 0.0, 50_000.0), Err(AdmissionRejection::InvalidInput));

        risk.add_position(Position::new("ETH/USD", OrderSide::Buy, 0.02, 3_000.0, 1));
        // Count is checked before size
        assert_eq!(
            risk.check_admission("BTC/USD", 0.0001, 50_000.0),
            Err(AdmissionRejection::MaxConcurrentPositions { open: 1, limit: 1 })
        );
    }

    #[test]
    fn test_portfolio_exposure_limit() {
        let config = RiskConfig {
            max_pair_exposure: 1.0,
            ..RiskConfig::default()
        };
        let mut risk = PortfolioRiskManager::new(1_000.0, "USD", config);
        risk.add_position(Position::new("BTC/USD", OrderSide::Buy, 0.014, 50_000.0, 1));
        assert!(risk.can_take_position("ETH/USD", 0.02, 3_000.0));
        assert!(matches!(
            risk.check_admission("ETH/USD", 0.034, 3_000.0),
            Err(AdmissionRejection::PortfolioExposure { .. })
        ));
    }

    #[test]
    fn test_pnl_sign_convention() {
        let long = Position::new("BTC/USD", OrderSide::Buy, 2.0, 100.0, 1);
        let short = Position::new("BTC/USD", OrderSide::Sell, 2.0, 100.0, 1);

        let pnl = PortfolioRiskManager::calculate_pnl(&long, 110.0);
        assert!((pnl.unrealized_pnl - 20.0).abs() < 1e-9);
        assert!((pnl.percent - 10.0).abs() < 1e-9);

        let pnl = PortfolioRiskManager::calculate_pnl(&short, 110.0);
        assert!((pnl.unrealized_pnl + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_close_position_records_history() {
        let mut risk = manager(1_000.0);
        let winner = risk.add_position(Position::new("BTC/USD", OrderSide::Buy, 1.0, 100.0, 1));
        let loser = risk.add_position(Position::new("BTC/USD", OrderSide::Sell, 0.5, 100.0, 1));

        let closed = risk.close_position(&winner, 105.0, 10).unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert!((closed.realized_pnl - 5.0).abs() < 1e-9);
        risk.close_position(&loser, 104.0, 10);

        let state = risk.get_portfolio_state();
        assert!(state.exposure_by_pair.is_empty());
        assert!(state.positions.is_empty());
        assert_eq!(state.pair_history["BTC/USD"], PairTradeStats { wins: 1, losses: 1 });
        assert_eq!(state.pair_history["BTC/USD"].win_rate(), Some(0.5));
        assert!((risk.realized_pnl() - 3.0).abs() < 1e-9);
        assert!(risk.close_position(&winner, 1.0, 11).is_none());
    }

    #[test]
    fn test_prime_and_mark_to_market() {
        let mut risk = manager(10_000.0);
        let mut balances = HashMap::new();
        balances.insert(
            "USD".to_string(),
            Balance {
                asset: "USD".to_string(),
                free: 10_000.0,
                locked: 0.0,
            },
        );
        let positions = vec![
            ExchangePosition {
                id: Some("ex-1".to_string()),
                pair: "BTC/USD".to_string(),
                side: OrderSide::Buy,
                size: 0.01,
                entry_price: 50_000.0,
                timestamp: 1,
            },
            ExchangePosition {
                id: None,
                pair: "ETH/USD".to_string(),
                side: OrderSide::Sell,
                size: 0.0,
                entry_price: 3_000.0,
                timestamp: 1,
            },
        ];
        risk.prime(&balances, &positions);
        assert_eq!(risk.open_position_count(), 1);
        assert!((risk.pair_exposure("BTC/USD") - 500.0).abs() < 1e-9);

        let mut prices = IndexMap::new();
        prices.insert("BTC/USD".to_string(), 51_000.0);
        risk.mark_to_market(&prices);
        assert!((risk.unrealized_pnl() - 10.0).abs() < 1e-9);
        assert_eq!(risk.get_portfolio_state().positions["ex-1"].unrealized_pnl, risk.unrealized_pnl());
    }

    #[test]
    fn test_held_pairs() {
        let mut risk = manager(10_000.0);
        risk.add_position(Position::new("ETH/USD", OrderSide::Buy, 0.1, 3_000.0, 1));
        risk.add_position(Position::new("BTC/USD", OrderSide::Buy, 0.001, 50_000.0, 1));
        risk.add_position(Position::new("ETH/USD", OrderSide::Buy, 0.1, 3_000.0, 1));
        let state = risk.get_portfolio_state();
        assert_eq!(state.held_pairs(), vec!["ETH/USD", "BTC/USD"]);
        assert!(state.has_position_in("BTC/USD"));
        assert!(!state.has_position_in("SOL/USD"));
    }

    const PAIRS: [&str; 3] = ["BTC/USD", "ETH/USD", "SOL/USD"];

    fn seeded_manager(budget: f64, existing: &[(usize, f64)]) -> PortfolioRiskManager {
        let mut risk = manager(budget);
        for (pair, value) in existing {
            risk.add_position(Position::new(PAIRS[*pair], OrderSide::Buy, *value / 100.0, 100.0, 1));
        }
        risk
    }

    proptest! {
        #[test]
        fn prop_rejection_survives_doubling(
            budget in 100.0f64..100_000.0,
            existing in prop::collection::vec((0usize..3, 1.0f64..5_000.0), 0..12),
            pair in 0usize..3,
            size in 0.001f64..100.0,
            price in 1.0f64..10_000.0,
        ) {
            let risk = seeded_manager(budget, &existing);
            // Size floor is the one check that can flip from fail to pass
            prop_assume!(size * price >= RiskConfig::default().min_position_size_usd);
            if !risk.can_take_position(PAIRS[pair], size, price) {
                prop_assert!(!risk.can_take_position(PAIRS[pair], size * 2.0, price));
            }
        }

        #[test]
        fn prop_admitted_exposure_stays_within_budget(
            budget in 100.0f64..100_000.0,
            requests in prop::collection::vec((0usize..3, 0.001f64..50.0, 1.0f64..5_000.0), 0..40),
        ) {
            let mut risk = manager(budget);
            for (pair, size, price) in requests {
                if risk.can_take_position(PAIRS[pair], size, price) {
                    risk.add_position(Position::new(PAIRS[pair], OrderSide::Buy, size, price, 1));
                }
                let state = risk.get_portfolio_state();
                let limit = budget * RiskConfig::default().max_portfolio_exposure;
                prop_assert!(state.exposure_by_pair.values().sum::<f64>() <= limit + 1e-6);
                for exposure in state.exposure_by_pair.values() {
                    prop_assert!(*exposure <= budget * RiskConfig::default().max_pair_exposure + 1e-6);
                }
            }
        }
    }
}
