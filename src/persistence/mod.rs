//! Persistence boundary
//!
//! The core only calls the four operations of [`SessionStore`]; storage
//! technology lives behind it.

use crate::{
    connectors::OrderAck,
    orchestrator::{PerformanceMetrics, SessionRecord},
    strategy::Opportunity,
    Result,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;

/// Persistence boundary consumed by the orchestrator
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or update the session record
    async fn update_session(&self, session: &SessionRecord) -> Result<()>;

    /// Register a pair traded in the current session
    async fn add_pair(&self, pair: &str) -> Result<()>;

    /// Store an executed opportunity together with its order
    async fn store_opportunity(&self, opportunity: &Opportunity, order: &OrderAck) -> Result<()>;

    /// Store a performance snapshot
    async fn update_performance_metrics(&self, metrics: &PerformanceMetrics) -> Result<()>;
}

/// Opportunity documents and performance snapshots kept by default
pub const DEFAULT_RECORD_CAPACITY: usize = 1_000;

/// In-memory [`SessionStore`]. Opportunity documents and performance
/// snapshots are ring buffers; the oldest record is dropped at capacity.
#[derive(Debug)]
pub struct MemoryStore {
    capacity: usize,
    sessions: RwLock<Vec<SessionRecord>>,
    pairs: RwLock<Vec<String>>,
    opportunities: RwLock<VecDeque<serde_json::Value>>,
    metrics: RwLock<VecDeque<PerformanceMetrics>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RECORD_CAPACITY)
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store keeping at most `capacity` opportunity
    /// documents and performance snapshots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: RwLock::new(Vec::new()),
            pairs: RwLock::new(Vec::new()),
            opportunities: RwLock::new(VecDeque::new()),
            metrics: RwLock::new(VecDeque::new()),
        }
    }

    /// Latest record for every session, in insertion order
    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions.read().await.clone()
    }

    /// Pairs registered so far
    pub async fn pairs(&self) -> Vec<String> {
        self.pairs.read().await.clone()
    }

    /// Stored opportunity documents, oldest first
    pub async fn opportunities(&self) -> Vec<serde_json::Value> {
        self.opportunities.read().await.iter().cloned().collect()
    }

    /// Stored performance snapshots, oldest first
    pub async fn performance_metrics(&self) -> Vec<PerformanceMetrics> {
        self.metrics.read().await.iter().cloned().collect()
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, capacity: usize, record: T) {
    if buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(record);
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn update_session(&self, session: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        debug!(session_id = %session.id, status = %session.status, "Session stored");
        Ok(())
    }

    async fn add_pair(&self, pair: &str) -> Result<()> {
        let mut pairs = self.pairs.write().await;
        if !pairs.iter().any(|p| p == pair) {
            pairs.push(pair.to_string());
        }
        Ok(())
    }

    async fn store_opportunity(&self, opportunity: &Opportunity, order: &OrderAck) -> Result<()> {
        let document = json!({
            "opportunity": opportunity,
            "order": order,
        });
        push_bounded(&mut *self.opportunities.write().await, self.capacity, document);
        Ok(())
    }

    async fn update_performance_metrics(&self, metrics: &PerformanceMetrics) -> Result<()> {
        push_bounded(&mut *self.metrics.write().await, self.capacity, metrics.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SessionStatus;

    fn session(status: SessionStatus) -> SessionRecord {
        SessionRecord {
            id: "session-1".to_string(),
            pairs: vec!["BTC/USD".to_string()],
            budget: 1000.0,
            status,
            started_at: 1_000,
            ended_at: None,
            opportunities_detected: 0,
            trades_executed: 0,
        }
    }

    #[tokio::test]
    async fn test_update_session_upserts() {
        let store = MemoryStore::new();
        store.update_session(&session(SessionStatus::Active)).await.unwrap();
        store.update_session(&session(SessionStatus::Closed)).await.unwrap();

        let sessions = store.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_metrics_buffer_is_bounded() {
        let store = MemoryStore::with_capacity(2);
        for timestamp in 1..=3 {
            let metrics = PerformanceMetrics {
                session_id: "session-1".to_string(),
                timestamp,
                opportunities_detected: 0,
                trades_executed: 0,
                open_positions: 0,
                total_exposure: 0.0,
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                ticks_run: 0,
                ticks_skipped: 0,
            };
            store.update_performance_metrics(&metrics).await.unwrap();
        }

        let stored = store.performance_metrics().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].timestamp, 2);
        assert_eq!(stored[1].timestamp, 3);
    }

    #[tokio::test]
    async fn test_add_pair_is_idempotent() {
        let store = MemoryStore::new();
        store.add_pair("BTC/USD").await.unwrap();
        store.add_pair("BTC/USD").await.unwrap();
        store.add_pair("ETH/USD").await.unwrap();
        assert_eq!(store.pairs().await, vec!["BTC/USD", "ETH/USD"]);
    }
}
