//! Multi-factor opportunity ranking
//!
//! Each opportunity gets six factor scores in `[0, 100]`, combined with the
//! configured weights. Sorting is stable, so equal final scores keep the
//! order in which opportunities were passed in.

use super::opportunity::Opportunity;
use crate::{
    config::{RankingConfig, RankingWeights},
    data::lookup_correlation,
    risk::PortfolioState,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Detection ages inside this window get the full timing score
const TIMING_SWEET_SPOT_MS: (i64, i64) = (1_000, 2_000);

/// Absolute spread band (percent) that gets the full spread score
const SPREAD_SWEET_SPOT: (f64, f64) = (0.1, 0.3);

/// Per-factor scores, each in `[0, 100]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    /// Size of the futures move
    pub signal_strength: f64,
    /// Freshness relative to the expected lead time
    pub timing: f64,
    /// Futures/spot spread
    pub spread: f64,
    /// Spot depth near mid
    pub liquidity: f64,
    /// Overlap with pairs already held
    pub diversification: f64,
    /// Past win rate on the pair
    pub historical: f64,
}

impl FactorScores {
    /// Weighted sum
    pub fn weighted(&self, weights: &RankingWeights) -> f64 {
        self.signal_strength * weights.signal_strength
            + self.timing * weights.timing
            + self.spread * weights.spread
            + self.liquidity * weights.liquidity
            + self.diversification * weights.diversification
            + self.historical * weights.historical
    }
}

/// An opportunity with its scores; lives for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOpportunity {
    /// The scored opportunity
    pub opportunity: Opportunity,
    /// Factor scores
    pub scores: FactorScores,
    /// Weighted final score
    pub final_score: f64,
}

/// Scores and orders opportunities against the portfolio
#[derive(Debug, Clone)]
pub struct RankingEngine {
    weights: RankingWeights,
    correlation_aware: bool,
}

impl RankingEngine {
    /// Create a ranking engine. Weights that do not sum to 1 are used as-is.
    pub fn new(config: &RankingConfig) -> Self {
        let total = config.weights.total();
        if (total - 1.0).abs() > 1e-6 {
            warn!(total, "Ranking weights do not sum to 1.0");
        }
        Self {
            weights: config.weights,
            correlation_aware: config.correlation_aware_diversification,
        }
    }

    /// Configured weights
    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Score every opportunity at time `now` and sort by final score, descending
    pub fn rank(&self, opportunities: &[Opportunity], state: &PortfolioState, now: i64) -> Vec<RankedOpportunity> {
        let mut ranked: Vec<RankedOpportunity> = opportunities
            .iter()
            .map(|opportunity| {
                let scores = self.score(opportunity, state, now);
                let final_score = scores.weighted(&self.weights);
                debug!(
                    pair = %opportunity.pair,
                    opportunity_id = %opportunity.id,
                    final_score,
                    ?scores,
                    "Opportunity scored"
                );
                RankedOpportunity {
                    opportunity: opportunity.clone(),
                    scores,
                    final_score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        ranked
    }

    /// All six factor scores for one opportunity
    pub fn score(&self, opportunity: &Opportunity, state: &PortfolioState, now: i64) -> FactorScores {
        FactorScores {
            signal_strength: score_signal_strength(opportunity.signal.magnitude_percent),
            timing: score_timing(opportunity.age_ms(now), opportunity.expected_lead_time_ms),
            spread: score_spread(opportunity.signal.spread_percent),
            liquidity: score_liquidity(opportunity.market_snapshot.spot_liquidity_usd),
            diversification: score_diversification(&opportunity.pair, state, self.correlation_aware),
            historical: score_historical(&opportunity.pair, state),
        }
    }
}

/// Leading run of a ranked list at or above `min_score`. The list is sorted,
/// so the scan stops at the first entry below the threshold.
pub fn above_threshold(ranked: &[RankedOpportunity], min_score: f64) -> impl Iterator<Item = &RankedOpportunity> {
    ranked.iter().take_while(move |r| r.final_score >= min_score)
}

/// Saturating step function of the absolute futures move
pub fn score_signal_strength(magnitude_percent: f64) -> f64 {
    let magnitude = magnitude_percent.abs();
    if magnitude >= 1.0 {
        100.0
    } else if magnitude >= 0.5 {
        90.0
    } else if magnitude >= 0.1 {
        70.0
    } else if magnitude >= 0.05 {
        50.0
    } else {
        magnitude / 0.05 * 50.0
    }
}

/// 100 inside the sweet spot, 80 up to the expected lead time, then linear
/// decay to zero at twice the lead time
pub fn score_timing(age_ms: i64, expected_lead_time_ms: i64) -> f64 {
    let age = age_ms.max(0);
    let lead = expected_lead_time_ms.max(1);

    if age >= TIMING_SWEET_SPOT_MS.0 && age <= TIMING_SWEET_SPOT_MS.1 {
        100.0
    } else if age <= lead {
        80.0
    } else {
        let overdue = (age - lead) as f64 / lead as f64;
        (80.0 * (1.0 - overdue)).max(0.0)
    }
}

/// 100 inside the sweet-spot band; tapers below it and decays above it
pub fn score_spread(spread_percent: f64) -> f64 {
    let spread = spread_percent.abs();
    let (low, high) = SPREAD_SWEET_SPOT;

    if spread < low {
        50.0 + spread / low * 50.0
    } else if spread <= high {
        100.0
    } else {
        (100.0 - (spread - high) * 100.0).max(0.0)
    }
}

/// Staircase over spot depth in USD
pub fn score_liquidity(liquidity_usd: f64) -> f64 {
    let liquidity = liquidity_usd.max(0.0);
    if liquidity >= 100_000.0 {
        100.0
    } else if liquidity >= 50_000.0 {
        80.0
    } else if liquidity >= 20_000.0 {
        60.0
    } else if liquidity >= 5_000.0 {
        40.0
    } else {
        liquidity / 5_000.0 * 40.0
    }
}

/// 100 with an empty book, 20 when the pair is already held. Otherwise 80,
/// or with `correlation_aware` set, `100 - 80 * max|corr|` against held pairs
/// floored at 20 (80 when no correlation is known yet).
pub fn score_diversification(pair: &str, state: &PortfolioState, correlation_aware: bool) -> f64 {
    if state.positions.is_empty() {
        return 100.0;
    }
    if state.has_position_in(pair) {
        return 20.0;
    }
    if !correlation_aware {
        return 80.0;
    }

    let max_correlation = state
        .held_pairs()
        .into_iter()
        .filter_map(|held| lookup_correlation(&state.correlations, pair, held))
        .map(f64::abs)
        .reduce(f64::max);

    match max_correlation {
        Some(correlation) => (100.0 - 80.0 * correlation).max(20.0),
        None => 80.0,
    }
}

/// Pair win rate scaled to 100; neutral 50 without history
pub fn score_historical(pair: &str, state: &PortfolioState) -> f64 {
    state
        .pair_history
        .get(pair)
        .and_then(|stats| stats.win_rate())
        .map(|rate| rate * 100.0)
        .unwrap_or(50.0)
}
