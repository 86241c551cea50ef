//! End-to-end main-loop ticks against scripted market data

use crate::common::{ScriptedExchange, TestUtils};
use futures_lead_mm::{
    config::RankingWeights,
    connectors::{ExchangePosition, OrderSide, OrderType, TimeInForce},
    orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorEvent, SessionStatus},
    persistence::MemoryStore,
    trading::RejectionReason,
    Result,
};
use std::sync::Arc;

const T0: i64 = TestUtils::T0;

struct Harness {
    exchange: Arc<ScriptedExchange>,
    store: Arc<MemoryStore>,
    orchestrator: Arc<Orchestrator>,
}

async fn started(pairs: &[&str], tweak: impl FnOnce(&mut futures_lead_mm::MarketMakerConfig)) -> Result<Harness> {
    started_with(pairs, tweak, ScriptedExchange::new()).await
}

async fn started_with(
    pairs: &[&str],
    tweak: impl FnOnce(&mut futures_lead_mm::MarketMakerConfig),
    exchange: ScriptedExchange,
) -> Result<Harness> {
    let mut config = TestUtils::create_test_config(pairs);
    tweak(&mut config);

    let exchange = Arc::new(exchange);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = OrchestratorBuilder::new(config)
        .exchange(exchange.clone())
        .store(store.clone())
        .build()?;
    orchestrator.start().await?;

    Ok(Harness {
        exchange,
        store,
        orchestrator: Arc::new(orchestrator),
    })
}

/// BTC futures up 0.6% over the window while spot sits at 50,000
fn feed_btc_lead(orchestrator: &Orchestrator) -> Result<()> {
    let collector = orchestrator.collector();
    collector.record_futures_price("BTC/USD", 50_000.0, T0)?;
    collector.record_futures_price("BTC/USD", 50_300.0, T0 + 4_000)?;
    assert!(collector.on_order_book_update(&TestUtils::book("BTC/USD", 49_990.0, 50_010.0, 2.0, T0 + 4_500)));
    Ok(())
}

#[tokio::test]
async fn test_tick_executes_top_opportunity() -> Result<()> {
    let harness = started(&["BTC/USD"], |_| {}).await?;
    let mut events = harness.orchestrator.subscribe();
    feed_btc_lead(&harness.orchestrator)?;

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    assert_eq!(report.snapshots, 1);
    assert_eq!(report.detected, 1);
    assert_eq!(report.ranked, 1);

    let outcome = report.execution.expect("an execution attempt");
    assert!(outcome.executed);

    let orders = harness.exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "BTC/USD");
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].order_type, OrderType::Limit);
    assert_eq!(orders[0].time_in_force, TimeInForce::IOC);
    assert!(orders[0].price > 50_010.0);
    // 10% of the budget at the order price
    assert!((orders[0].amount * orders[0].price - 100.0).abs() < 1e-9);

    let state = harness.orchestrator.portfolio_state().await;
    assert_eq!(state.positions.len(), 1);
    assert!(state.exposure_by_pair["BTC/USD"] > 99.0);
    assert!(state.exposure_by_pair["BTC/USD"] < 101.0);

    let session = harness.orchestrator.session().await.unwrap();
    assert_eq!(session.opportunities_detected, 1);
    assert_eq!(session.trades_executed, 1);

    let stored = harness.store.opportunities().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["opportunity"]["pair"], "BTC/USD");
    assert_eq!(stored[0]["order"]["id"], "scripted-1");

    let mut saw_trade = false;
    while let Ok(event) = events.try_recv() {
        if let OrchestratorEvent::TradeExecuted { opportunity, order, .. } = event {
            assert_eq!(opportunity.pair, "BTC/USD");
            assert_eq!(order.id, "scripted-1");
            saw_trade = true;
        }
    }
    assert!(saw_trade);

    // Consumed and inside the dedupe window: nothing to do on the next tick
    let report = harness.orchestrator.run_tick_at(T0 + 6_000).await?;
    assert_eq!(report.detected, 0);
    assert_eq!(report.ranked, 0);
    assert!(report.execution.is_none());
    assert_eq!(harness.exchange.orders().len(), 1);

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_failing_pair_does_not_block_others() -> Result<()> {
    let harness = started(&["BTC/USD", "ETH/USD"], |_| {}).await?;
    harness.exchange.set_futures_price("BTC/USD:USD", 50_000.0);
    harness.exchange.fail_ticker("ETH/USD:USD");

    let errors = harness
        .orchestrator
        .collector()
        .poll_futures(&*harness.exchange, T0)
        .await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("ETH/USD"));
    assert_eq!(harness.orchestrator.collector().futures_history("BTC/USD").unwrap().len(), 1);

    // ETH never gets futures data; BTC still trades
    feed_btc_lead(&harness.orchestrator)?;
    harness
        .orchestrator
        .collector()
        .on_order_book_update(&TestUtils::book("ETH/USD", 2_999.0, 3_001.0, 10.0, T0 + 4_500));

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    assert_eq!(report.snapshots, 1);
    assert_eq!(report.pair_errors, 1);
    assert!(report.execution.unwrap().executed);

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_risk_limit_blocks_execution() -> Result<()> {
    let harness = started(&["BTC/USD"], |config| config.risk.max_pair_exposure = 0.05).await?;
    feed_btc_lead(&harness.orchestrator)?;

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    assert_eq!(report.detected, 1);
    assert!(report.execution.is_none());
    assert!(harness.exchange.orders().is_empty());
    assert!(harness.orchestrator.portfolio_state().await.positions.is_empty());

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_low_score_is_not_executed() -> Result<()> {
    let harness = started(&["BTC/USD"], |config| config.ranking.min_opportunity_score = 99.0).await?;
    feed_btc_lead(&harness.orchestrator)?;

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    assert_eq!(report.ranked, 1);
    assert!(report.execution.is_none());
    assert!(harness.exchange.orders().is_empty());

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_order_failure_keeps_opportunity_until_cooldown() -> Result<()> {
    let harness = started(&["BTC/USD"], |_| {}).await?;
    harness.exchange.fail_orders(true);
    feed_btc_lead(&harness.orchestrator)?;

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    let outcome = report.execution.unwrap();
    assert_eq!(outcome.reason, Some(RejectionReason::OrderPlacementFailed));
    assert_eq!(harness.orchestrator.session().await.unwrap().trades_executed, 0);

    // Still live, but the pair is cooling down
    harness.exchange.fail_orders(false);
    let report = harness.orchestrator.run_tick_at(T0 + 6_000).await?;
    assert_eq!(report.ranked, 1);
    assert_eq!(report.execution.unwrap().reason, Some(RejectionReason::RateLimited));

    // Past the execution delay; expiry is checked before the cooldown
    let report = harness.orchestrator.run_tick_at(T0 + 9_000).await?;
    assert_eq!(report.execution.unwrap().reason, Some(RejectionReason::OpportunityExpired));
    assert_eq!(harness.exchange.orders().len(), 1);

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_fill_at_order_price_stays_within_pair_limit() -> Result<()> {
    let harness = started(&["BTC/USD"], |config| config.trading.position_size_fraction = 0.2).await?;
    feed_btc_lead(&harness.orchestrator)?;

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    assert!(report.execution.unwrap().executed);

    let orders = harness.exchange.orders();
    assert!(orders[0].price > 50_010.0);

    let limit = 1_000.0 * 0.2;
    let state = harness.orchestrator.portfolio_state().await;
    let exposure = state.exposure_by_pair["BTC/USD"];
    assert!(exposure <= limit, "pair exposure {} exceeds limit {}", exposure, limit);
    assert!(exposure > limit - 1e-6);

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_blocked_top_candidate_falls_through_to_next() -> Result<()> {
    let exchange = ScriptedExchange::new();
    exchange.add_position(ExchangePosition {
        id: Some("btc-existing".to_string()),
        pair: "BTC/USD".to_string(),
        side: OrderSide::Buy,
        size: 0.004,
        entry_price: 50_000.0,
        timestamp: T0,
    });
    let harness = started_with(
        &["BTC/USD", "ETH/USD"],
        |config| {
            config.ranking.weights = RankingWeights {
                signal_strength: 1.0,
                timing: 0.0,
                spread: 0.0,
                liquidity: 0.0,
                diversification: 0.0,
                historical: 0.0,
            }
        },
        exchange,
    )
    .await?;

    // BTC moves 0.6%, ETH 0.2%: BTC ranks first but its pair is at the limit
    feed_btc_lead(&harness.orchestrator)?;
    let collector = harness.orchestrator.collector();
    collector.record_futures_price("ETH/USD", 3_000.0, T0)?;
    collector.record_futures_price("ETH/USD", 3_006.0, T0 + 4_000)?;
    assert!(collector.on_order_book_update(&TestUtils::book("ETH/USD", 2_999.0, 3_001.0, 10.0, T0 + 4_500)));

    let report = harness.orchestrator.run_tick_at(T0 + 5_000).await?;
    assert_eq!(report.ranked, 2);
    assert!(report.execution.unwrap().executed);

    let orders = harness.exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].symbol, "ETH/USD");

    let state = harness.orchestrator.portfolio_state().await;
    assert_eq!(state.positions.len(), 2);
    assert!((state.exposure_by_pair["BTC/USD"] - 200.0).abs() < 1e-9);
    assert!((state.exposure_by_pair["ETH/USD"] - 100.0).abs() < 1e-9);

    harness.orchestrator.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_during_inflight_tick_leaves_session_final() -> Result<()> {
    let harness = started(&["BTC/USD"], |_| {}).await?;
    harness.exchange.delay_orders(500);
    feed_btc_lead(&harness.orchestrator)?;

    let orchestrator = Arc::clone(&harness.orchestrator);
    let tick = tokio::spawn(async move { orchestrator.run_tick_at(T0 + 5_000).await });

    let exchange = Arc::clone(&harness.exchange);
    let placed = TestUtils::wait_for_condition(
        move || {
            let exchange = Arc::clone(&exchange);
            async move { exchange.orders().len() == 1 }
        },
        2_000,
        5,
    )
    .await;
    assert!(placed);

    harness.orchestrator.stop().await?;
    let closed = harness.orchestrator.session().await.unwrap();
    assert_eq!(closed.status, SessionStatus::Closed);
    assert_eq!(closed.opportunities_detected, 1);
    assert_eq!(closed.trades_executed, 0);

    // The order still completes after stop()
    let report = tick.await??;
    assert!(report.execution.unwrap().executed);

    let session = harness.orchestrator.session().await.unwrap();
    assert_eq!(session.trades_executed, 0);
    assert_eq!(session.ended_at, closed.ended_at);

    let stored = harness.store.sessions().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, SessionStatus::Closed);
    assert_eq!(stored[0].trades_executed, 0);
    Ok(())
}
