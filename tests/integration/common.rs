//! Shared helpers and a scripted exchange double

use async_trait::async_trait;
use futures_lead_mm::{
    config::MarketMakerConfig,
    connectors::{
        Balance, ExchangeGateway, ExchangePosition, OrderAck, OrderBookUpdate, OrderRequest, OrderStatus, Ticker,
    },
    MarketMakerError, Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Exchange double whose answers are set by the test
pub struct ScriptedExchange {
    fail_connect: AtomicBool,
    fail_orders: AtomicBool,
    order_delay_ms: AtomicU64,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    orders: Mutex<Vec<OrderRequest>>,
    futures_prices: Mutex<HashMap<String, f64>>,
    failing_tickers: Mutex<HashSet<String>>,
    positions: Mutex<Vec<ExchangePosition>>,
    updates: broadcast::Sender<OrderBookUpdate>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            fail_connect: AtomicBool::new(false),
            fail_orders: AtomicBool::new(false),
            order_delay_ms: AtomicU64::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            orders: Mutex::new(Vec::new()),
            futures_prices: Mutex::new(HashMap::new()),
            failing_tickers: Mutex::new(HashSet::new()),
            positions: Mutex::new(Vec::new()),
            updates,
        }
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    /// Hold every order call for `delay_ms` before answering
    pub fn delay_orders(&self, delay_ms: u64) {
        self.order_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn set_futures_price(&self, symbol: &str, price: f64) {
        self.futures_prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn fail_ticker(&self, symbol: &str) {
        self.failing_tickers.lock().unwrap().insert(symbol.to_string());
    }

    pub fn add_position(&self, position: ExchangePosition) {
        self.positions.lock().unwrap().push(position);
    }

    pub fn push_book(&self, update: OrderBookUpdate) {
        let _ = self.updates.send(update);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedExchange {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MarketMakerError::Connection("connection refused".to_string()).into());
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>> {
        let mut balances = HashMap::new();
        balances.insert(
            "USD".to_string(),
            Balance {
                asset: "USD".to_string(),
                free: 1_000.0,
                locked: 0.0,
            },
        );
        Ok(balances)
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        if self.failing_tickers.lock().unwrap().contains(symbol) {
            return Err(MarketMakerError::Exchange(format!("ticker unavailable: {}", symbol)).into());
        }
        let last = self
            .futures_prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| MarketMakerError::Exchange(format!("unknown symbol: {}", symbol)))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            bid: None,
            ask: None,
            last,
            timestamp: 0,
        })
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.orders.lock().unwrap().push(request.clone());
        let delay_ms = self.order_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(MarketMakerError::Exchange("order rejected by venue".to_string()).into());
        }
        let id = format!("scripted-{}", self.orders.lock().unwrap().len());
        Ok(OrderAck {
            id,
            status: OrderStatus::Closed,
            price: request.price,
            amount: request.amount,
        })
    }

    fn order_book_updates(&self) -> broadcast::Receiver<OrderBookUpdate> {
        self.updates.subscribe()
    }
}

/// Test utilities for integration tests
pub struct TestUtils;

impl TestUtils {
    /// Epoch milliseconds used as the start of scripted market data
    pub const T0: i64 = 1_700_000_000_000;

    /// Configuration whose timers never fire during a test
    pub fn create_test_config(pairs: &[&str]) -> MarketMakerConfig {
        let mut config = MarketMakerConfig::new(pairs.iter().map(|p| p.to_string()).collect(), 1_000.0);
        config.data.futures_poll_interval_ms = 3_600_000;
        config.scheduling.main_loop_interval_ms = 3_600_000;
        config.scheduling.performance_interval_ms = 3_600_000;
        config.scheduling.correlation_interval_ms = 3_600_000;
        config
    }

    /// Two-sided book with `depth` base units on each side
    pub fn book(symbol: &str, bid: f64, ask: f64, depth: f64, timestamp: i64) -> OrderBookUpdate {
        OrderBookUpdate {
            symbol: symbol.to_string(),
            bids: vec![[bid, depth]],
            asks: vec![[ask, depth]],
            timestamp,
        }
    }

    /// Wait for a condition with timeout
    pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_ms: u64, check_interval_ms: u64) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(timeout_ms);
        let interval = std::time::Duration::from_millis(check_interval_ms);

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            tokio::time::sleep(interval).await;
        }

        false
    }
}
