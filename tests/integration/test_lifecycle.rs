//! Start/stop lifecycle, session bookkeeping and startup failure handling

use crate::common::{ScriptedExchange, TestUtils};
use futures_lead_mm::{
    connectors::{ExchangePosition, OrderSide},
    orchestrator::{OrchestratorBuilder, OrchestratorEvent, OrchestratorState, SessionStatus},
    persistence::MemoryStore,
    MarketMakerError, Result,
};
use std::sync::Arc;
use tokio_test::assert_ok;

fn build(exchange: Arc<ScriptedExchange>, store: Arc<MemoryStore>) -> Result<futures_lead_mm::Orchestrator> {
    OrchestratorBuilder::new(TestUtils::create_test_config(&["BTC/USD", "ETH/USD"]))
        .exchange(exchange)
        .store(store)
        .build()
}

#[tokio::test]
async fn test_start_stop_are_idempotent() -> Result<()> {
    let exchange = Arc::new(ScriptedExchange::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(exchange.clone(), store.clone())?;
    let mut events = orchestrator.subscribe();

    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);

    assert_ok!(orchestrator.start().await);
    assert_ok!(orchestrator.start().await);
    assert_eq!(orchestrator.state().await, OrchestratorState::Running);
    assert_eq!(exchange.connects(), 1);

    let session_id = match events.recv().await? {
        OrchestratorEvent::Started { session_id, pairs, .. } => {
            assert_eq!(pairs, vec!["BTC/USD", "ETH/USD"]);
            session_id
        }
        other => panic!("expected started event, got {:?}", other),
    };
    assert_eq!(store.pairs().await, vec!["BTC/USD", "ETH/USD"]);

    let sessions = store.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, session_id);
    assert_eq!(sessions[0].status, SessionStatus::Active);

    assert_ok!(orchestrator.stop().await);
    assert_ok!(orchestrator.stop().await);
    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    assert_eq!(exchange.disconnects(), 1);

    match events.recv().await? {
        OrchestratorEvent::Stopped { session_id: stopped, .. } => assert_eq!(stopped, session_id),
        other => panic!("expected stopped event, got {:?}", other),
    }

    let sessions = store.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Closed);
    assert!(sessions[0].ended_at.is_some());

    // Only the two lifecycle events were published
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_rolls_back() -> Result<()> {
    let exchange = Arc::new(ScriptedExchange::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(exchange.clone(), store.clone())?;
    exchange.fail_connect(true);

    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MarketMakerError>(),
        Some(MarketMakerError::Startup(_))
    ));
    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    assert!(orchestrator.session().await.is_none());
    assert!(store.sessions().await.is_empty());

    // Stop on a never-started orchestrator is a no-op
    assert_ok!(orchestrator.stop().await);
    assert_eq!(exchange.disconnects(), 0);

    exchange.fail_connect(false);
    assert_ok!(orchestrator.start().await);
    assert_eq!(orchestrator.state().await, OrchestratorState::Running);
    orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_restart_opens_new_session() -> Result<()> {
    let exchange = Arc::new(ScriptedExchange::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(exchange.clone(), store.clone())?;

    orchestrator.start().await?;
    let first = orchestrator.session().await.unwrap().id;
    orchestrator.stop().await?;

    orchestrator.start().await?;
    let second = orchestrator.session().await.unwrap().id;
    orchestrator.stop().await?;

    assert_ne!(first, second);
    let sessions = store.sessions().await;
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.status == SessionStatus::Closed));
    assert_eq!(exchange.connects(), 2);
    Ok(())
}

#[tokio::test]
async fn test_start_primes_existing_positions() -> Result<()> {
    let exchange = Arc::new(ScriptedExchange::new());
    exchange.add_position(ExchangePosition {
        id: Some("existing-1".to_string()),
        pair: "ETH/USD".to_string(),
        side: OrderSide::Buy,
        size: 0.05,
        entry_price: 3_000.0,
        timestamp: TestUtils::T0,
    });
    let orchestrator = build(exchange, Arc::new(MemoryStore::new()))?;

    orchestrator.start().await?;
    let state = orchestrator.portfolio_state().await;
    assert!(state.positions.contains_key("existing-1"));
    assert!((state.exposure_by_pair["ETH/USD"] - 150.0).abs() < 1e-9);

    orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_order_book_stream_feeds_collector() -> Result<()> {
    let exchange = Arc::new(ScriptedExchange::new());
    let orchestrator = build(exchange.clone(), Arc::new(MemoryStore::new()))?;
    orchestrator.start().await?;

    exchange.push_book(TestUtils::book("BTC/USD", 49_990.0, 50_010.0, 1.0, TestUtils::T0));
    exchange.push_book(TestUtils::book("DOGE/USD", 0.1, 0.11, 1.0, TestUtils::T0));

    let collector = orchestrator.collector();
    let ingested = TestUtils::wait_for_condition(
        move || async move { collector.spot_history("BTC/USD").map(|h| h.len()).unwrap_or(0) == 1 },
        2_000,
        10,
    )
    .await;
    assert!(ingested);
    assert!(collector.spot_history("DOGE/USD").is_none());

    orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_performance_snapshot_is_stored() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(Arc::new(ScriptedExchange::new()), store.clone())?;
    orchestrator.start().await?;

    orchestrator.run_tick_at(TestUtils::T0).await?;
    let metrics = orchestrator.performance_snapshot().await;
    let session = orchestrator.session().await.unwrap();
    assert_eq!(metrics.session_id, session.id);
    assert_eq!(metrics.ticks_run, 1);
    assert_eq!(metrics.open_positions, 0);

    let stored = store.performance_metrics().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0], metrics);

    orchestrator.stop().await?;
    Ok(())
}
