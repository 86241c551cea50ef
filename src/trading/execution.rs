//! Time-boxed order execution
//!
//! Checks run in a fixed order and stop at the first failure: age, per-pair
//! cooldown, structural validation, then order placement. Rejections are
//! returned as values; exchange errors never escape this module.

use crate::{
    config::ExecutionConfig,
    connectors::{ExchangeGateway, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce},
    strategy::Opportunity,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

/// Why an execution attempt did not place an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// Older than the maximum execution delay
    OpportunityExpired,
    /// Pair cooldown has not elapsed
    RateLimited,
    /// Opportunity or size failed validation
    ValidationFailed,
    /// The exchange refused or failed the order
    OrderPlacementFailed,
}

impl RejectionReason {
    /// Wire-style name
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::OpportunityExpired => "OPPORTUNITY_EXPIRED",
            RejectionReason::RateLimited => "RATE_LIMITED",
            RejectionReason::ValidationFailed => "VALIDATION_FAILED",
            RejectionReason::OrderPlacementFailed => "ORDER_PLACEMENT_FAILED",
        }
    }

    /// Whether the opportunity is spent after this rejection. Rate limits and
    /// placement failures leave it eligible for a later tick.
    pub fn consumes_opportunity(&self) -> bool {
        matches!(
            self,
            RejectionReason::OpportunityExpired | RejectionReason::ValidationFailed
        )
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Whether an order was accepted by the exchange
    pub executed: bool,
    /// Exchange acknowledgement when executed
    pub order: Option<OrderAck>,
    /// Rejection reason when not executed
    pub reason: Option<RejectionReason>,
    /// Time spent in the order call, in milliseconds
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    fn rejected(reason: RejectionReason, execution_time_ms: u64) -> Self {
        Self {
            executed: false,
            order: None,
            reason: Some(reason),
            execution_time_ms,
        }
    }
}

/// Places IOC limit orders for ranked opportunities
#[derive(Debug)]
pub struct ExecutionEngine {
    config: ExecutionConfig,
    last_execution: HashMap<String, i64>,
    last_sweep: i64,
}

impl ExecutionEngine {
    /// Create an engine with an empty cooldown map
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            last_execution: HashMap::new(),
            last_sweep: 0,
        }
    }

    /// Execute against the wall clock
    pub async fn execute_opportunity(
        &mut self,
        exchange: &dyn ExchangeGateway,
        opportunity: &Opportunity,
        size: f64,
    ) -> ExecutionOutcome {
        self.execute_opportunity_at(exchange, opportunity, size, crate::now_millis())
            .await
    }

    /// Execute with an explicit `now` in epoch milliseconds
    pub async fn execute_opportunity_at(
        &mut self,
        exchange: &dyn ExchangeGateway,
        opportunity: &Opportunity,
        size: f64,
        now: i64,
    ) -> ExecutionOutcome {
        if now - self.last_sweep >= self.config.cooldown_sweep_interval_ms {
            self.sweep_cooldowns(now);
        }

        let age = opportunity.age_ms(now);
        if age > self.config.max_execution_delay_ms {
            return self.reject(opportunity, RejectionReason::OpportunityExpired, 0, age);
        }

        if let Some(last) = self.last_execution.get(&opportunity.pair) {
            if now - last < self.config.min_time_between_executions_ms {
                return self.reject(opportunity, RejectionReason::RateLimited, 0, age);
            }
        }

        if let Err(e) = opportunity.validate() {
            debug!(error = %e, "Opportunity failed validation");
            return self.reject(opportunity, RejectionReason::ValidationFailed, 0, age);
        }
        if !(size.is_finite() && size > 0.0) {
            debug!(size, "Execution size is not positive");
            return self.reject(opportunity, RejectionReason::ValidationFailed, 0, age);
        }

        let request = self.build_order(opportunity, size);
        self.stamp_cooldown(&opportunity.pair, now);

        let started = Instant::now();
        let placed = exchange.create_order(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("mm_execution_latency_ms", elapsed_ms as f64);

        match placed {
            Ok(ack) if !ack.id.is_empty() && ack.status != OrderStatus::Rejected => {
                counter!("mm_trades_executed_total", 1);
                crate::log_trade!(
                    info,
                    request.symbol,
                    request.side,
                    ack.amount,
                    ack.price,
                    order_id = %ack.id,
                    status = %ack.status,
                    opportunity_id = %opportunity.id,
                    execution_time_ms = elapsed_ms,
                    "Order placed"
                );
                ExecutionOutcome {
                    executed: true,
                    order: Some(ack),
                    reason: None,
                    execution_time_ms: elapsed_ms,
                }
            }
            Ok(ack) => {
                warn!(
                    pair = %opportunity.pair,
                    order_id = %ack.id,
                    status = %ack.status,
                    "Order not accepted by exchange"
                );
                self.reject(opportunity, RejectionReason::OrderPlacementFailed, elapsed_ms, age)
            }
            Err(e) => {
                warn!(
                    pair = %opportunity.pair,
                    symbol = %request.symbol,
                    price = request.price,
                    amount = request.amount,
                    error = %e,
                    "Order placement failed"
                );
                self.reject(opportunity, RejectionReason::OrderPlacementFailed, elapsed_ms, age)
            }
        }
    }

    /// Limit price nudged through the touch: above the ask for buys, below
    /// the bid for sells
    pub fn order_price(&self, opportunity: &Opportunity) -> f64 {
        let market = &opportunity.market_snapshot;
        match opportunity.signal.direction {
            OrderSide::Buy => market.spot_ask * (1.0 + self.config.price_offset),
            OrderSide::Sell => market.spot_bid * (1.0 - self.config.price_offset),
        }
    }

    /// Highest per-unit value a fill can book: the order price for buys,
    /// the bid for sells. Admission and sizing use this price.
    pub fn worst_fill_price(&self, opportunity: &Opportunity) -> f64 {
        self.order_price(opportunity).max(opportunity.entry_price())
    }

    /// IOC limit order for the opportunity's spot pair
    pub fn build_order(&self, opportunity: &Opportunity, size: f64) -> OrderRequest {
        OrderRequest {
            symbol: opportunity.pair.clone(),
            side: opportunity.signal.direction,
            order_type: OrderType::Limit,
            price: self.order_price(opportunity),
            amount: size,
            time_in_force: TimeInForce::IOC,
        }
    }

    /// Evict cooldown entries older than twice the cooldown, then trim to
    /// capacity oldest-first. Returns the number of evicted entries.
    ///
    /// The capacity is soft: entries still inside their cooldown are never
    /// evicted, so the map can exceed it while more pairs than the cap are
    /// cooling down at once.
    pub fn sweep_cooldowns(&mut self, now: i64) -> usize {
        self.last_sweep = now;
        let before = self.last_execution.len();
        let horizon = self.config.min_time_between_executions_ms * 2;
        self.last_execution.retain(|_, last| now - *last <= horizon);
        self.enforce_capacity(now);

        let evicted = before - self.last_execution.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.last_execution.len(), "Cooldown map swept");
        }
        evicted
    }

    /// Last execution attempt on a pair
    pub fn last_execution(&self, pair: &str) -> Option<i64> {
        self.last_execution.get(pair).copied()
    }

    /// Entries in the cooldown map
    pub fn cooldown_entries(&self) -> usize {
        self.last_execution.len()
    }

    fn stamp_cooldown(&mut self, pair: &str, now: i64) {
        self.last_execution.insert(pair.to_string(), now);
        self.enforce_capacity(now);
    }

    fn enforce_capacity(&mut self, now: i64) {
        let capacity = self.config.cooldown_map_capacity.max(1);
        let cooldown = self.config.min_time_between_executions_ms;
        while self.last_execution.len() > capacity {
            let oldest = self
                .last_execution
                .iter()
                .filter(|(_, last)| now - **last >= cooldown)
                .min_by_key(|(_, last)| **last)
                .map(|(pair, _)| pair.clone());
            match oldest {
                Some(pair) => {
                    self.last_execution.remove(&pair);
                }
                None => {
                    debug!(
                        entries = self.last_execution.len(),
                        capacity, "Cooldown map over capacity, all entries still cooling down"
                    );
                    break;
                }
            }
        }
    }

    fn reject(
        &self,
        opportunity: &Opportunity,
        reason: RejectionReason,
        execution_time_ms: u64,
        age_ms: i64,
    ) -> ExecutionOutcome {
        counter!("mm_execution_rejections_total", 1, "reason" => reason.as_str());
        debug!(
            pair = %opportunity.pair,
            opportunity_id = %opportunity.id,
            %reason,
            age_ms,
            "Execution rejected"
        );
        ExecutionOutcome::rejected(reason, execution_time_ms)
    }
}
