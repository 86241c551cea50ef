//! Session bookkeeping, lifecycle state and emitted events

use crate::{connectors::OrderAck, strategy::Opportunity};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    /// Idle; `start()` is accepted
    Stopped,
    /// Connecting and priming
    Starting,
    /// Timers armed
    Running,
    /// Timers disarmed, session being finalised
    Stopping,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Stopped => write!(f, "stopped"),
            OrchestratorState::Starting => write!(f, "starting"),
            OrchestratorState::Running => write!(f, "running"),
            OrchestratorState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Session status as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session in progress
    Active,
    /// Session finalised by `stop()`
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// One start-to-stop run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id
    pub id: String,
    /// Pairs watched
    pub pairs: Vec<String>,
    /// Budget in quote currency
    pub budget: f64,
    /// Status
    pub status: SessionStatus,
    /// Start time in epoch milliseconds
    pub started_at: i64,
    /// End time in epoch milliseconds
    pub ended_at: Option<i64>,
    /// Opportunities detected during the session
    pub opportunities_detected: u64,
    /// Orders accepted during the session
    pub trades_executed: u64,
}

impl SessionRecord {
    /// Open a new active session
    pub fn open(pairs: Vec<String>, budget: f64, started_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pairs,
            budget,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            opportunities_detected: 0,
            trades_executed: 0,
        }
    }

    /// Mark the session closed
    pub fn close(&mut self, ended_at: i64) {
        self.status = SessionStatus::Closed;
        self.ended_at = Some(ended_at);
    }
}

/// Periodic performance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Session the snapshot belongs to
    pub session_id: String,
    /// Snapshot time in epoch milliseconds
    pub timestamp: i64,
    /// Opportunities detected so far
    pub opportunities_detected: u64,
    /// Orders accepted so far
    pub trades_executed: u64,
    /// Open positions
    pub open_positions: usize,
    /// Aggregate exposure
    pub total_exposure: f64,
    /// Realised P&L
    pub realized_pnl: f64,
    /// Unrealised P&L at the last mark
    pub unrealized_pnl: f64,
    /// Main-loop ticks completed
    pub ticks_run: u64,
    /// Main-loop ticks skipped because one was in flight
    pub ticks_skipped: u64,
}

/// Events published on the orchestrator's broadcast stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OrchestratorEvent {
    /// `start()` completed
    Started {
        /// Session id
        session_id: String,
        /// Watched pairs
        pairs: Vec<String>,
        /// Epoch milliseconds
        timestamp: i64,
    },
    /// `stop()` completed
    Stopped {
        /// Session id
        session_id: String,
        /// Epoch milliseconds
        timestamp: i64,
    },
    /// An order was accepted for an opportunity
    TradeExecuted {
        /// The executed opportunity
        opportunity: Box<Opportunity>,
        /// Exchange acknowledgement
        order: OrderAck,
        /// Time spent placing the order
        execution_time_ms: u64,
    },
}
