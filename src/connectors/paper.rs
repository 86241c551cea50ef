//! Simulated exchange used for dry runs
//!
//! Every pair follows a seeded random walk with occasional jumps. The futures
//! ticker tracks the walk directly while the spot book trails it by
//! `lead_delay_ms`, so futures moves show up in spot a little later.

use super::traits::{
    Balance, ExchangeGateway, ExchangePosition, OrderAck, OrderBookUpdate, OrderRequest,
    OrderSide, OrderStatus, Ticker,
};
use super::{base_asset, futures_symbol, ConnectionStatus};
use crate::{MarketMakerError, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Paper exchange configuration
#[derive(Debug, Clone)]
pub struct PaperExchangeConfig {
    /// Spot pairs to simulate
    pub pairs: Vec<String>,
    /// Quote currency
    pub quote_currency: String,
    /// Starting price for every pair
    pub initial_price: f64,
    /// Maximum relative move per step
    pub volatility: f64,
    /// Probability of a jump on each step
    pub jump_probability: f64,
    /// Relative size of a jump
    pub jump_size: f64,
    /// How far spot trails futures in milliseconds
    pub lead_delay_ms: i64,
    /// Interval between simulation steps in milliseconds
    pub update_interval_ms: u64,
    /// Relative spot bid/ask spread
    pub spread: f64,
    /// Book levels per side
    pub depth_levels: usize,
    /// Quote value resting at each level
    pub level_notional: f64,
    /// Initial quote balance
    pub initial_balance: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            pairs: vec!["BTC/USD".to_string()],
            quote_currency: "USD".to_string(),
            initial_price: 100.0,
            volatility: 0.0004,
            jump_probability: 0.02,
            jump_size: 0.004,
            lead_delay_ms: 1_500,
            update_interval_ms: 250,
            spread: 0.0004,
            depth_levels: 5,
            level_notional: 10_000.0,
            initial_balance: 10_000.0,
            seed: 42,
        }
    }
}

#[derive(Debug)]
struct PaperMarket {
    fair: f64,
    history: VecDeque<(i64, f64)>,
    best_bid: f64,
    best_ask: f64,
}

impl PaperMarket {
    fn new(price: f64, spread: f64) -> Self {
        Self {
            fair: price,
            history: VecDeque::new(),
            best_bid: price * (1.0 - spread / 2.0),
            best_ask: price * (1.0 + spread / 2.0),
        }
    }

    /// Fair value as it stood `delay_ms` ago
    fn lagged_fair(&self, now: i64, delay_ms: i64) -> f64 {
        self.history
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= now - delay_ms)
            .or_else(|| self.history.front())
            .map(|(_, price)| *price)
            .unwrap_or(self.fair)
    }
}

#[derive(Debug)]
struct PaperState {
    status: ConnectionStatus,
    markets: HashMap<String, PaperMarket>,
    balances: HashMap<String, Balance>,
    rng: StdRng,
    order_seq: u64,
}

impl PaperState {
    fn step(&mut self, config: &PaperExchangeConfig, now: i64) -> Vec<OrderBookUpdate> {
        let mut updates = Vec::with_capacity(self.markets.len());

        for pair in &config.pairs {
            let mut change = self.rng.gen_range(-1.0..=1.0) * config.volatility;
            if self.rng.gen_bool(config.jump_probability) {
                let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                change += sign * config.jump_size;
            }

            let Some(market) = self.markets.get_mut(pair) else {
                continue;
            };

            market.fair *= 1.0 + change;
            market.history.push_back((now, market.fair));
            while market.history.len() > 1
                && market
                    .history
                    .front()
                    .map(|(ts, _)| *ts < now - config.lead_delay_ms * 4)
                    .unwrap_or(false)
            {
                market.history.pop_front();
            }

            let spot_mid = market.lagged_fair(now, config.lead_delay_ms);
            market.best_bid = spot_mid * (1.0 - config.spread / 2.0);
            market.best_ask = spot_mid * (1.0 + config.spread / 2.0);

            updates.push(build_book(pair, market, config, now));
        }

        updates
    }
}

fn build_book(
    pair: &str,
    market: &PaperMarket,
    config: &PaperExchangeConfig,
    now: i64,
) -> OrderBookUpdate {
    let tick = market.best_bid * config.spread / 2.0;
    let bids = (0..config.depth_levels)
        .map(|i| {
            let price = market.best_bid - tick * i as f64;
            [price, config.level_notional / price]
        })
        .collect();
    let asks = (0..config.depth_levels)
        .map(|i| {
            let price = market.best_ask + tick * i as f64;
            [price, config.level_notional / price]
        })
        .collect();

    OrderBookUpdate {
        symbol: pair.to_string(),
        bids,
        asks,
        timestamp: now,
    }
}

/// Simulated exchange implementing [`ExchangeGateway`]
pub struct PaperExchange {
    config: PaperExchangeConfig,
    state: Arc<Mutex<PaperState>>,
    updates: broadcast::Sender<OrderBookUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PaperExchange {
    /// Create a new paper exchange
    pub fn new(config: PaperExchangeConfig) -> Self {
        let markets = config
            .pairs
            .iter()
            .map(|pair| (pair.clone(), PaperMarket::new(config.initial_price, config.spread)))
            .collect();

        let mut balances = HashMap::new();
        balances.insert(
            config.quote_currency.clone(),
            Balance {
                asset: config.quote_currency.clone(),
                free: config.initial_balance,
                locked: 0.0,
            },
        );

        let (updates, _) = broadcast::channel(1024);

        Self {
            state: Arc::new(Mutex::new(PaperState {
                status: ConnectionStatus::Disconnected,
                markets,
                balances,
                rng: StdRng::seed_from_u64(config.seed),
                order_seq: 0,
            })),
            config,
            updates,
            task: Mutex::new(None),
        }
    }

    /// Advance the simulation by one step and publish the resulting books
    pub async fn step(&self, now: i64) {
        let updates = self.state.lock().await.step(&self.config, now);
        for update in updates {
            // No subscribers is fine
            let _ = self.updates.send(update);
        }
    }

    /// Current connection status
    pub async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.state.lock().await.status != ConnectionStatus::Connected {
            return Err(MarketMakerError::Connection("Paper exchange not connected".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn connect(&self) -> Result<()> {
        self.state.lock().await.status = ConnectionStatus::Connected;

        let mut task = self.task.lock().await;
        if task.is_none() {
            let state = Arc::clone(&self.state);
            let updates = self.updates.clone();
            let config = self.config.clone();
            *task = Some(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_millis(config.update_interval_ms));
                loop {
                    ticker.tick().await;
                    let books = state.lock().await.step(&config, crate::now_millis());
                    for book in books {
                        let _ = updates.send(book);
                    }
                }
            }));
        }

        info!(pairs = self.config.pairs.len(), "Paper exchange connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().await.status = ConnectionStatus::Disconnected;
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        info!("Paper exchange disconnected");
        Ok(())
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>> {
        self.ensure_connected().await?;
        Ok(self.state.lock().await.balances.clone())
    }

    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>> {
        self.ensure_connected().await?;
        Ok(Vec::new())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ensure_connected().await?;
        let state = self.state.lock().await;

        for (pair, market) in &state.markets {
            if symbol == futures_symbol(pair, &self.config.quote_currency) {
                return Ok(Ticker {
                    symbol: symbol.to_string(),
                    bid: Some(market.fair * (1.0 - self.config.spread / 2.0)),
                    ask: Some(market.fair * (1.0 + self.config.spread / 2.0)),
                    last: market.fair,
                    timestamp: crate::now_millis(),
                });
            }
            if symbol == pair {
                return Ok(Ticker {
                    symbol: symbol.to_string(),
                    bid: Some(market.best_bid),
                    ask: Some(market.best_ask),
                    last: (market.best_bid + market.best_ask) / 2.0,
                    timestamp: crate::now_millis(),
                });
            }
        }

        Err(MarketMakerError::Exchange(format!("Unknown symbol: {}", symbol)).into())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.ensure_connected().await?;
        let mut state = self.state.lock().await;

        let (best_bid, best_ask) = state
            .markets
            .get(&request.symbol)
            .map(|m| (m.best_bid, m.best_ask))
            .ok_or_else(|| MarketMakerError::Exchange(format!("Unknown symbol: {}", request.symbol)))?;

        state.order_seq += 1;
        let id = format!("paper-{}", state.order_seq);

        let fill_price = match request.side {
            OrderSide::Buy if request.price >= best_ask => Some(best_ask),
            OrderSide::Sell if request.price <= best_bid => Some(best_bid),
            _ => None,
        };

        let Some(fill_price) = fill_price else {
            debug!(order_id = %id, symbol = %request.symbol, "IOC order did not cross, canceled");
            return Ok(OrderAck {
                id,
                status: OrderStatus::Canceled,
                price: request.price,
                amount: 0.0,
            });
        };

        let notional = fill_price * request.amount;
        let quote = self.config.quote_currency.clone();
        let base = base_asset(&request.symbol).to_string();
        let direction = request.side.direction();

        let quote_balance = state.balances.entry(quote.clone()).or_insert(Balance {
            asset: quote,
            free: 0.0,
            locked: 0.0,
        });
        quote_balance.free -= notional * direction;

        let base_balance = state.balances.entry(base.clone()).or_insert(Balance {
            asset: base,
            free: 0.0,
            locked: 0.0,
        });
        base_balance.free += request.amount * direction;

        Ok(OrderAck {
            id,
            status: OrderStatus::Closed,
            price: fill_price,
            amount: request.amount,
        })
    }

    fn order_book_updates(&self) -> broadcast::Receiver<OrderBookUpdate> {
        self.updates.subscribe()
    }
}
