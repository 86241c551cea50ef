//! Opportunity detection and ranking

pub mod detector;
pub mod opportunity;
pub mod ranking;

pub use detector::{DetectionResult, OpportunityDetector};
pub use opportunity::{expected_lead_time_ms, MarketSnapshot, Opportunity, Signal};
pub use ranking::{
    above_threshold, score_diversification, score_historical, score_liquidity, score_signal_strength,
    score_spread, score_timing, FactorScores, RankedOpportunity, RankingEngine,
};
