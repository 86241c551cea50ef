//! Opportunity detection with per-pair dedupe
//!
//! A pair holds at most one live opportunity. It is replaced only once it has
//! expired or been consumed, and a fresh detection on the same pair must also
//! respect the dedupe window measured from the previous detection.

use super::opportunity::Opportunity;
use crate::{config::DetectionConfig, data::PairSnapshot, MarketMakerError};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Output of one detection pass
#[derive(Debug, Default)]
pub struct DetectionResult {
    /// Newly detected opportunities, in snapshot order
    pub detected: Vec<Opportunity>,
    /// Pairs whose opportunity failed validation
    pub errors: Vec<MarketMakerError>,
}

/// Threshold filter and live-opportunity registry
#[derive(Debug)]
pub struct OpportunityDetector {
    config: DetectionConfig,
    live: IndexMap<String, Opportunity>,
    last_detection: HashMap<String, i64>,
}

impl OpportunityDetector {
    /// Create a detector
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            live: IndexMap::new(),
            last_detection: HashMap::new(),
        }
    }

    /// Scan snapshots for futures moves above the threshold
    pub fn detect(&mut self, snapshots: &IndexMap<String, PairSnapshot>, now: i64) -> DetectionResult {
        self.prune_expired(now);

        let mut result = DetectionResult::default();
        for (pair, snapshot) in snapshots {
            if snapshot.futures_movement.abs() < self.config.min_futures_movement {
                trace!(pair = %pair, movement = snapshot.futures_movement, "Below movement threshold");
                continue;
            }

            if self.live.contains_key(pair) {
                trace!(pair = %pair, "Live opportunity already held for pair");
                continue;
            }

            if let Some(last) = self.last_detection.get(pair) {
                if now - last < self.config.dedupe_window_ms {
                    trace!(pair = %pair, since_last_ms = now - last, "Within dedupe window");
                    continue;
                }
            }

            match Opportunity::from_snapshot(snapshot, now) {
                Ok(opportunity) => {
                    crate::log_signal!(
                        info,
                        opportunity.pair,
                        opportunity.signal.direction,
                        opportunity.signal.magnitude_percent,
                        opportunity_id = %opportunity.id,
                        spread_pct = opportunity.signal.spread_percent,
                        "Futures lead detected"
                    );
                    self.last_detection.insert(pair.clone(), now);
                    self.live.insert(pair.clone(), opportunity.clone());
                    result.detected.push(opportunity);
                }
                Err(e) => result.errors.push(e),
            }
        }

        result
    }

    /// Live opportunities in detection order
    pub fn live_opportunities(&self) -> Vec<Opportunity> {
        self.live.values().cloned().collect()
    }

    /// Number of live opportunities
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Remove a pair's opportunity once it has been acted on
    pub fn consume(&mut self, pair: &str) -> Option<Opportunity> {
        self.live.shift_remove(pair)
    }

    /// Drop opportunities older than the TTL; returns how many were dropped
    pub fn prune_expired(&mut self, now: i64) -> usize {
        let ttl = self.config.opportunity_ttl_ms;
        let before = self.live.len();
        self.live.retain(|_, opportunity| opportunity.age_ms(now) <= ttl);

        // Detection stamps older than both windows carry no information
        let horizon = ttl.max(self.config.dedupe_window_ms);
        self.last_detection.retain(|_, last| now - *last <= horizon);

        let pruned = before - self.live.len();
        if pruned > 0 {
            debug!(pruned, "Expired opportunities pruned");
        }
        pruned
    }
}
