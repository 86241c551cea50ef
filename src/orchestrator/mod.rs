//! Multi-pair orchestrator
//!
//! Drives the decision pipeline from three timers (main loop, performance
//! snapshot, correlation refresh) plus the futures poller and the pushed
//! order book stream. The main loop runs in a single task and every tick
//! additionally takes a busy flag, so ticks never overlap.

pub mod session;

pub use session::{OrchestratorEvent, OrchestratorState, PerformanceMetrics, SessionRecord, SessionStatus};

use crate::{
    config::MarketMakerConfig,
    connectors::ExchangeGateway,
    data::DataCollector,
    persistence::{MemoryStore, SessionStore},
    risk::{PortfolioRiskManager, PortfolioState, Position},
    strategy::{above_threshold, OpportunityDetector, RankingEngine},
    trading::{ExecutionEngine, ExecutionOutcome},
    MarketMakerError, Result,
};
use indexmap::IndexMap;
use metrics::{counter, gauge, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What one main-loop tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// The tick was skipped because another was in flight
    pub skipped: bool,
    /// Pairs snapshotted
    pub snapshots: usize,
    /// Pairs that failed data collection or detection
    pub pair_errors: usize,
    /// Opportunities newly detected
    pub detected: usize,
    /// Live opportunities ranked
    pub ranked: usize,
    /// Execution attempt, if any candidate was admitted
    pub execution: Option<ExecutionOutcome>,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Components mutated by the main loop. Held under one lock for the whole
/// tick so admission and insertion cannot interleave with another tick.
struct TradingCore {
    detector: OpportunityDetector,
    ranking: RankingEngine,
    risk: PortfolioRiskManager,
    execution: ExecutionEngine,
}

impl TradingCore {
    fn new(config: &MarketMakerConfig) -> Self {
        Self {
            detector: OpportunityDetector::new(config.detection.clone()),
            ranking: RankingEngine::new(&config.ranking),
            risk: PortfolioRiskManager::new(
                config.trading.budget,
                config.trading.quote_currency.clone(),
                config.risk.clone(),
            ),
            execution: ExecutionEngine::new(config.execution.clone()),
        }
    }
}

/// Portfolio figures published after each tick for the performance timer
#[derive(Debug, Clone, Copy, Default)]
struct PortfolioSummary {
    open_positions: usize,
    total_exposure: f64,
    realized_pnl: f64,
    unrealized_pnl: f64,
}

impl PortfolioSummary {
    fn of(risk: &PortfolioRiskManager) -> Self {
        Self {
            open_positions: risk.open_position_count(),
            total_exposure: risk.total_exposure(),
            realized_pnl: risk.realized_pnl(),
            unrealized_pnl: risk.unrealized_pnl(),
        }
    }
}

struct Inner {
    config: MarketMakerConfig,
    exchange: Arc<dyn ExchangeGateway>,
    store: Arc<dyn SessionStore>,
    collector: DataCollector,
    core: Mutex<TradingCore>,
    summary: RwLock<PortfolioSummary>,
    state: RwLock<OrchestratorState>,
    session: RwLock<Option<SessionRecord>>,
    events: broadcast::Sender<OrchestratorEvent>,
    tick_busy: AtomicBool,
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Clears the busy flag when a tick ends, including on early return
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: MarketMakerConfig,
    exchange: Option<Arc<dyn ExchangeGateway>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl OrchestratorBuilder {
    /// Start from a configuration
    pub fn new(config: MarketMakerConfig) -> Self {
        Self {
            config,
            exchange: None,
            store: None,
        }
    }

    /// Exchange boundary (required)
    pub fn exchange(mut self, exchange: Arc<dyn ExchangeGateway>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Persistence boundary; defaults to [`MemoryStore`]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Orchestrator> {
        let exchange = self
            .exchange
            .ok_or_else(|| MarketMakerError::Configuration("exchange boundary is required".to_string()))?;
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        Orchestrator::new(self.config, exchange, store)
    }
}

/// Owns the pipeline and its timers
pub struct Orchestrator {
    inner: Arc<Inner>,
    lifecycle: Mutex<Lifecycle>,
}

impl Orchestrator {
    /// Create an orchestrator. Fails on an invalid configuration.
    pub fn new(
        config: MarketMakerConfig,
        exchange: Arc<dyn ExchangeGateway>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        config.validate()?;

        let collector = DataCollector::new(
            config.trading.pairs.clone(),
            config.trading.quote_currency.clone(),
            config.data.clone(),
        );
        let core = TradingCore::new(&config);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            pairs = ?config.trading.pairs,
            budget = config.trading.budget,
            "Orchestrator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                exchange,
                store,
                collector,
                core: Mutex::new(core),
                summary: RwLock::new(PortfolioSummary::default()),
                state: RwLock::new(OrchestratorState::Stopped),
                session: RwLock::new(None),
                events,
                tick_busy: AtomicBool::new(false),
                ticks_run: AtomicU64::new(0),
                ticks_skipped: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Builder entry point
    pub fn builder(config: MarketMakerConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Connect, open a session, prime the portfolio and arm the timers.
    /// Calling it while not stopped logs and does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let inner = &self.inner;

        let current = inner.state().await;
        if current != OrchestratorState::Stopped {
            warn!(state = %current, "start() ignored, orchestrator is not stopped");
            return Ok(());
        }

        inner.set_state(OrchestratorState::Starting).await;
        info!("Starting orchestrator");

        if let Err(e) = inner.exchange.connect().await {
            error!(error = %e, "Exchange connection failed");
            inner.set_state(OrchestratorState::Stopped).await;
            return Err(MarketMakerError::Startup(format!("exchange connect failed: {}", e)).into());
        }

        let now = crate::now_millis();
        let session = SessionRecord::open(inner.config.trading.pairs.clone(), inner.config.trading.budget, now);
        if let Err(e) = inner.store.update_session(&session).await {
            warn!(session_id = %session.id, error = %e, "Failed to persist new session");
        }
        for pair in &inner.config.trading.pairs {
            if let Err(e) = inner.store.add_pair(pair).await {
                warn!(pair = %pair, error = %e, "Failed to register pair");
            }
        }
        *inner.session.write().await = Some(session.clone());
        inner.ticks_run.store(0, Ordering::Relaxed);
        inner.ticks_skipped.store(0, Ordering::Relaxed);

        inner.prime_portfolio().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        lifecycle.tasks = self.spawn_tasks(shutdown_rx);
        lifecycle.shutdown = Some(shutdown_tx);

        inner.set_state(OrchestratorState::Running).await;
        info!(session_id = %session.id, pairs = ?session.pairs, "Orchestrator running");
        inner.emit(OrchestratorEvent::Started {
            session_id: session.id,
            pairs: session.pairs,
            timestamp: now,
        });

        Ok(())
    }

    /// Disarm timers, wait for in-flight work, close the session and
    /// disconnect. Calling it while not running logs and does nothing.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let inner = &self.inner;

        let current = inner.state().await;
        if current != OrchestratorState::Running {
            warn!(state = %current, "stop() ignored, orchestrator is not running");
            return Ok(());
        }

        let now = crate::now_millis();
        let closed = {
            let mut session = inner.session.write().await;
            inner.set_state(OrchestratorState::Stopping).await;
            session.as_mut().map(|s| {
                s.close(now);
                s.clone()
            })
        };
        info!("Stopping orchestrator");

        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Some(session) = &closed {
            if let Err(e) = inner.store.update_session(session).await {
                warn!(session_id = %session.id, error = %e, "Failed to persist closed session");
            }
        }

        if let Err(e) = inner.exchange.disconnect().await {
            warn!(error = %e, "Exchange disconnect failed");
        }

        inner.set_state(OrchestratorState::Stopped).await;
        let session_id = closed.map(|s| s.id).unwrap_or_default();
        info!(session_id = %session_id, "Orchestrator stopped");
        inner.emit(OrchestratorEvent::Stopped {
            session_id,
            timestamp: now,
        });

        Ok(())
    }

    /// Run one main-loop tick against the wall clock
    pub async fn run_tick(&self) -> Result<TickReport> {
        self.inner.run_tick(crate::now_millis()).await
    }

    /// Run one main-loop tick at an explicit time
    pub async fn run_tick_at(&self, now: i64) -> Result<TickReport> {
        self.inner.run_tick(now).await
    }

    /// Write a performance snapshot to the store and the metrics facade
    pub async fn performance_snapshot(&self) -> PerformanceMetrics {
        self.inner.performance_snapshot(crate::now_millis()).await
    }

    /// Recompute the correlation matrix
    pub async fn refresh_correlations(&self) -> IndexMap<String, f64> {
        self.inner.collector.refresh_correlations().await
    }

    /// Subscribe to lifecycle and trade events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Current lifecycle state
    pub async fn state(&self) -> OrchestratorState {
        self.inner.state().await
    }

    /// Current or last session
    pub async fn session(&self) -> Option<SessionRecord> {
        self.inner.session.read().await.clone()
    }

    /// Copy of the portfolio state
    pub async fn portfolio_state(&self) -> PortfolioState {
        self.inner.core.lock().await.risk.get_portfolio_state()
    }

    /// Market data collector
    pub fn collector(&self) -> &DataCollector {
        &self.inner.collector
    }

    /// Active configuration
    pub fn config(&self) -> &MarketMakerConfig {
        &self.inner.config
    }

    fn spawn_tasks(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let scheduling = &self.inner.config.scheduling;
        let mut tasks = Vec::new();

        tasks.push(self.spawn_order_book_listener(shutdown.clone()));

        let inner = Arc::clone(&self.inner);
        tasks.push(spawn_timer(
            "futures_poll",
            self.inner.config.data.futures_poll_interval_ms,
            shutdown.clone(),
            move || {
                let inner = Arc::clone(&inner);
                async move {
                    let now = crate::now_millis();
                    for e in inner.collector.poll_futures(inner.exchange.as_ref(), now).await {
                        debug!(error = %e, "Futures poll error");
                    }
                }
            },
        ));

        let inner = Arc::clone(&self.inner);
        tasks.push(spawn_timer("main_loop", scheduling.main_loop_interval_ms, shutdown.clone(), move || {
            let inner = Arc::clone(&inner);
            async move {
                if let Err(e) = inner.run_tick(crate::now_millis()).await {
                    error!(error = %e, "Main loop tick failed");
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(spawn_timer(
            "performance",
            scheduling.performance_interval_ms,
            shutdown.clone(),
            move || {
                let inner = Arc::clone(&inner);
                async move {
                    inner.performance_snapshot(crate::now_millis()).await;
                }
            },
        ));

        if self.inner.config.trading.pairs.len() > 1 {
            let inner = Arc::clone(&self.inner);
            tasks.push(spawn_timer(
                "correlation",
                scheduling.correlation_interval_ms,
                shutdown,
                move || {
                    let inner = Arc::clone(&inner);
                    async move {
                        let correlations = inner.collector.refresh_correlations().await;
                        debug!(?correlations, "Correlations refreshed");
                    }
                },
            ));
        }

        tasks
    }

    fn spawn_order_book_listener(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut updates = inner.exchange.order_book_updates();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = updates.recv() => match received {
                        Ok(update) => {
                            inner.collector.on_order_book_update(&update);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Order book listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Order book stream closed");
                            break;
                        }
                    },
                }
            }
            debug!("Order book listener stopped");
        })
    }
}

/// Run `job` every `period_ms` until shutdown. The first run happens one
/// period after arming; missed ticks are skipped, never bunched.
fn spawn_timer<F, Fut>(name: &'static str, period_ms: u64, mut shutdown: watch::Receiver<bool>, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let period = Duration::from_millis(period_ms.max(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => job().await,
            }
        }
        debug!(timer = name, "Timer stopped");
    })
}

impl Inner {
    async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    async fn set_state(&self, state: OrchestratorState) {
        *self.state.write().await = state;
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    /// Apply `update` to the session only while running. The check runs
    /// under the session lock, which `stop()` also holds while it leaves
    /// `Running` and closes the record.
    async fn update_session_counters(&self, update: impl FnOnce(&mut SessionRecord)) {
        let mut session = self.session.write().await;
        if self.state().await != OrchestratorState::Running {
            return;
        }
        match session.as_mut() {
            Some(record) if record.status == SessionStatus::Active => update(record),
            _ => {}
        }
    }

    async fn prime_portfolio(&self) {
        let balances = self.exchange.fetch_balances().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not fetch balances, priming without them");
            HashMap::new()
        });
        let positions = self.exchange.fetch_positions().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not fetch positions, priming without them");
            Vec::new()
        });

        let mut core = self.core.lock().await;
        *core = TradingCore::new(&self.config);
        core.risk.prime(&balances, &positions);
        *self.summary.write().await = PortfolioSummary::of(&core.risk);
    }

    async fn run_tick(&self, now: i64) -> Result<TickReport> {
        if self
            .tick_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            counter!("mm_ticks_skipped_total", 1);
            warn!("Previous tick still running, skipping");
            return Ok(TickReport::skipped());
        }
        let _guard = TickGuard(&self.tick_busy);

        let started = Instant::now();
        let report = self.process_tick(now).await;
        histogram!("mm_tick_duration_ms", started.elapsed().as_secs_f64() * 1_000.0);
        self.ticks_run.fetch_add(1, Ordering::Relaxed);

        Ok(report)
    }

    async fn process_tick(&self, now: i64) -> TickReport {
        let mut report = TickReport::default();

        let collection = self.collector.collect_all_data(now);
        for e in &collection.errors {
            debug!(error = %e, "Pair skipped this tick");
        }
        report.snapshots = collection.snapshots.len();
        report.pair_errors = collection.errors.len();

        let mut core = self.core.lock().await;

        let detection = core.detector.detect(&collection.snapshots, now);
        for e in &detection.errors {
            warn!(error = %e, "Opportunity rejected at construction");
        }
        report.pair_errors += detection.errors.len();
        report.detected = detection.detected.len();
        if !detection.detected.is_empty() {
            let detected = detection.detected.len() as u64;
            counter!("mm_opportunities_detected_total", detected);
            self.update_session_counters(|s| s.opportunities_detected += detected)
                .await;
        }

        core.risk.set_correlations(self.collector.correlations().await);
        let state = core.risk.get_portfolio_state();
        let live = core.detector.live_opportunities();
        let ranked = core.ranking.rank(&live, &state, now);
        report.ranked = ranked.len();

        let min_score = self.config.ranking.min_opportunity_score;
        for candidate in above_threshold(&ranked, min_score) {
            let opportunity = &candidate.opportunity;
            let admitted_price = core.execution.worst_fill_price(opportunity);
            let size = self.config.trading.budget * self.config.trading.position_size_fraction / admitted_price;

            if !core.risk.can_take_position(&opportunity.pair, size, admitted_price) {
                continue;
            }

            debug!(
                pair = %opportunity.pair,
                final_score = candidate.final_score,
                size,
                "Executing top admissible opportunity"
            );
            let outcome = core
                .execution
                .execute_opportunity_at(self.exchange.as_ref(), opportunity, size, now)
                .await;

            match (&outcome.order, outcome.reason) {
                (Some(order), _) if outcome.executed => {
                    core.detector.consume(&opportunity.pair);
                    if order.amount > 0.0 {
                        // Booked value never exceeds what admission approved
                        let price = if order.price > 0.0 {
                            order.price.min(admitted_price)
                        } else {
                            admitted_price
                        };
                        let position = Position::new(
                            opportunity.pair.clone(),
                            opportunity.signal.direction,
                            order.amount.min(size),
                            price,
                            now,
                        );
                        core.risk.add_position(position);
                    }
                    self.update_session_counters(|s| s.trades_executed += 1).await;

                    if let Err(e) = self.store.store_opportunity(opportunity, order).await {
                        warn!(opportunity_id = %opportunity.id, error = %e, "Failed to store executed opportunity");
                    }
                    self.emit(OrchestratorEvent::TradeExecuted {
                        opportunity: Box::new(opportunity.clone()),
                        order: order.clone(),
                        execution_time_ms: outcome.execution_time_ms,
                    });
                }
                (_, Some(reason)) => {
                    if reason.consumes_opportunity() {
                        core.detector.consume(&opportunity.pair);
                    }
                    info!(pair = %opportunity.pair, %reason, "Execution rejected");
                }
                _ => {}
            }

            report.execution = Some(outcome);
            break;
        }

        let marks: IndexMap<String, f64> = collection
            .snapshots
            .iter()
            .map(|(pair, snapshot)| (pair.clone(), snapshot.spot.mid))
            .collect();
        core.risk.mark_to_market(&marks);
        for position in core.risk.positions() {
            debug!(
                position_id = %position.id,
                pair = %position.pair,
                side = %position.side,
                unrealized_pnl = position.unrealized_pnl,
                "Open position"
            );
        }
        *self.summary.write().await = PortfolioSummary::of(&core.risk);

        report
    }

    async fn performance_snapshot(&self, now: i64) -> PerformanceMetrics {
        let summary = *self.summary.read().await;
        let session = self.session.read().await.clone();

        let metrics = PerformanceMetrics {
            session_id: session.as_ref().map(|s| s.id.clone()).unwrap_or_default(),
            timestamp: now,
            opportunities_detected: session.as_ref().map(|s| s.opportunities_detected).unwrap_or(0),
            trades_executed: session.as_ref().map(|s| s.trades_executed).unwrap_or(0),
            open_positions: summary.open_positions,
            total_exposure: summary.total_exposure,
            realized_pnl: summary.realized_pnl,
            unrealized_pnl: summary.unrealized_pnl,
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        };

        gauge!("mm_portfolio_exposure_usd", metrics.total_exposure);
        gauge!("mm_open_positions", metrics.open_positions as f64);
        info!(
            session_id = %metrics.session_id,
            opportunities = metrics.opportunities_detected,
            trades = metrics.trades_executed,
            open_positions = metrics.open_positions,
            exposure = metrics.total_exposure,
            realized_pnl = metrics.realized_pnl,
            unrealized_pnl = metrics.unrealized_pnl,
            "Performance snapshot"
        );

        if let Err(e) = self.store.update_performance_metrics(&metrics).await {
            warn!(error = %e, "Failed to store performance metrics");
        }
        metrics
    }
}
