//! Configuration management module

pub mod settings;

pub use settings::*;

use crate::{MarketMakerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Main configuration structure for the market maker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMakerConfig {
    /// Trading universe and capital
    pub trading: TradingConfig,
    /// Price buffer and market data configuration
    #[serde(default)]
    pub data: DataConfig,
    /// Opportunity detection configuration
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Ranking weights and score threshold
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Portfolio risk limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Order execution configuration
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Timer intervals
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

/// Trading universe and capital
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Spot pairs to watch, e.g. `BTC/USD`
    pub pairs: Vec<String>,
    /// Total budget in quote currency
    pub budget: f64,
    /// Quote currency used for balances and futures settlement
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    /// Fraction of the budget committed to a single new position
    #[serde(default = "default_position_size_fraction")]
    pub position_size_fraction: f64,
}

fn default_quote_currency() -> String {
    ConfigDefaults::QUOTE_CURRENCY.to_string()
}

fn default_position_size_fraction() -> f64 {
    ConfigDefaults::POSITION_SIZE_FRACTION
}

/// Price buffer and market data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Samples kept per price buffer
    pub buffer_capacity: usize,
    /// Window used for movement calculations in milliseconds
    pub movement_window_ms: i64,
    /// Samples used for return correlation
    pub correlation_lookback: usize,
    /// Band around mid price counted as liquidity (0.001 = 0.1%)
    pub liquidity_band: f64,
    /// Futures ticker polling interval in milliseconds
    pub futures_poll_interval_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: ConfigDefaults::BUFFER_CAPACITY,
            movement_window_ms: ConfigDefaults::MOVEMENT_WINDOW_MS,
            correlation_lookback: ConfigDefaults::CORRELATION_LOOKBACK,
            liquidity_band: ConfigDefaults::LIQUIDITY_BAND,
            futures_poll_interval_ms: ConfigDefaults::FUTURES_POLL_INTERVAL_MS,
        }
    }
}

/// Opportunity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum absolute futures movement in percent
    pub min_futures_movement: f64,
    /// Minimum gap between two detections on the same pair in milliseconds
    pub dedupe_window_ms: i64,
    /// Age after which a retained opportunity expires in milliseconds
    pub opportunity_ttl_ms: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_futures_movement: ConfigDefaults::MIN_FUTURES_MOVEMENT,
            dedupe_window_ms: ConfigDefaults::DEDUPE_WINDOW_MS,
            opportunity_ttl_ms: ConfigDefaults::OPPORTUNITY_TTL_MS,
        }
    }
}

/// Ranking factor weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingWeights {
    /// Signal strength weight
    pub signal_strength: f64,
    /// Timing weight
    pub timing: f64,
    /// Spread weight
    pub spread: f64,
    /// Liquidity weight
    pub liquidity: f64,
    /// Diversification weight
    pub diversification: f64,
    /// Historical performance weight
    pub historical: f64,
}

impl RankingWeights {
    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.signal_strength
            + self.timing
            + self.spread
            + self.liquidity
            + self.diversification
            + self.historical
    }
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            signal_strength: 0.30,
            timing: 0.20,
            spread: 0.15,
            liquidity: 0.15,
            diversification: 0.10,
            historical: 0.10,
        }
    }
}

/// Ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Minimum final score for an opportunity to be executed
    pub min_opportunity_score: f64,
    /// Score diversification from the correlation matrix instead of the placeholder
    pub correlation_aware_diversification: bool,
    /// Factor weights, expected to sum to 1.0
    pub weights: RankingWeights,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_opportunity_score: ConfigDefaults::MIN_OPPORTUNITY_SCORE,
            correlation_aware_diversification: false,
            weights: RankingWeights::default(),
        }
    }
}

/// Portfolio risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum number of open positions
    pub max_concurrent_positions: usize,
    /// Minimum position value in USD
    pub min_position_size_usd: f64,
    /// Maximum aggregate exposure as a fraction of the budget
    pub max_portfolio_exposure: f64,
    /// Maximum exposure per pair as a fraction of the budget
    pub max_pair_exposure: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_positions: ConfigDefaults::MAX_CONCURRENT_POSITIONS,
            min_position_size_usd: ConfigDefaults::MIN_POSITION_SIZE_USD,
            max_portfolio_exposure: ConfigDefaults::MAX_PORTFOLIO_EXPOSURE,
            max_pair_exposure: ConfigDefaults::MAX_PAIR_EXPOSURE,
        }
    }
}

/// Order execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum age of an opportunity at execution time in milliseconds
    pub max_execution_delay_ms: i64,
    /// Minimum time between two executions on the same pair in milliseconds
    pub min_time_between_executions_ms: i64,
    /// Fraction added to the ask (buys) or taken off the bid (sells)
    pub price_offset: f64,
    /// Maximum entries kept in the per-pair cooldown map
    pub cooldown_map_capacity: usize,
    /// Interval between cooldown map sweeps in milliseconds
    pub cooldown_sweep_interval_ms: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_execution_delay_ms: ConfigDefaults::MAX_EXECUTION_DELAY_MS,
            min_time_between_executions_ms: ConfigDefaults::MIN_TIME_BETWEEN_EXECUTIONS_MS,
            price_offset: ConfigDefaults::PRICE_OFFSET,
            cooldown_map_capacity: ConfigDefaults::COOLDOWN_MAP_CAPACITY,
            cooldown_sweep_interval_ms: ConfigDefaults::COOLDOWN_SWEEP_INTERVAL_MS,
        }
    }
}

/// Timer intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Main control loop interval in milliseconds
    pub main_loop_interval_ms: u64,
    /// Performance snapshot interval in milliseconds
    pub performance_interval_ms: u64,
    /// Correlation refresh interval in milliseconds
    pub correlation_interval_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            main_loop_interval_ms: ConfigDefaults::MAIN_LOOP_INTERVAL_MS,
            performance_interval_ms: ConfigDefaults::PERFORMANCE_INTERVAL_MS,
            correlation_interval_ms: ConfigDefaults::CORRELATION_INTERVAL_MS,
        }
    }
}

impl MarketMakerConfig {
    /// Create a configuration with default settings for the given pairs and budget
    pub fn new(pairs: Vec<String>, budget: f64) -> Self {
        let mut config = Self::default();
        config.trading.pairs = pairs;
        config.trading.budget = budget;
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MarketMakerError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        let config: MarketMakerConfig = toml::from_str(&content).map_err(|e| {
            MarketMakerError::Configuration(format!("Failed to parse config: {}", e))
        })?;

        Ok(config)
    }

    /// Load configuration from a TOML file overlaid with `LEADLAG__SECTION__KEY` variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("LEADLAG")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trading.pairs")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| MarketMakerError::Configuration(format!("Failed to load config: {}", e)))?;

        let config = settings.try_deserialize::<MarketMakerConfig>().map_err(|e| {
            MarketMakerError::Configuration(format!("Failed to deserialize config: {}", e))
        })?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.trading.pairs.is_empty() {
            return Err(
                MarketMakerError::Configuration("At least one pair is required".to_string()).into(),
            );
        }

        for pair in &self.trading.pairs {
            ConfigValidator::validate_pair(pair)?;
        }

        ConfigValidator::validate_positive(self.trading.budget, "Budget")?;
        ConfigValidator::validate_fraction(
            self.trading.position_size_fraction,
            "Position size fraction",
        )?;

        ConfigValidator::validate_positive(self.data.buffer_capacity as f64, "Buffer capacity")?;
        ConfigValidator::validate_positive(
            self.data.movement_window_ms as f64,
            "Movement window",
        )?;
        ConfigValidator::validate_fraction(self.data.liquidity_band, "Liquidity band")?;
        ConfigValidator::validate_positive(
            self.data.futures_poll_interval_ms as f64,
            "Futures poll interval",
        )?;

        ConfigValidator::validate_positive(
            self.detection.min_futures_movement,
            "Minimum futures movement",
        )?;
        ConfigValidator::validate_non_negative(
            self.detection.dedupe_window_ms as f64,
            "Dedupe window",
        )?;
        ConfigValidator::validate_positive(
            self.detection.opportunity_ttl_ms as f64,
            "Opportunity TTL",
        )?;

        ConfigValidator::validate_fraction(
            self.risk.max_portfolio_exposure,
            "Max portfolio exposure",
        )?;
        ConfigValidator::validate_fraction(self.risk.max_pair_exposure, "Max pair exposure")?;
        ConfigValidator::validate_positive(
            self.risk.max_concurrent_positions as f64,
            "Max concurrent positions",
        )?;

        ConfigValidator::validate_positive(
            self.execution.max_execution_delay_ms as f64,
            "Max execution delay",
        )?;
        ConfigValidator::validate_non_negative(
            self.execution.min_time_between_executions_ms as f64,
            "Execution cooldown",
        )?;
        ConfigValidator::validate_non_negative(self.execution.price_offset, "Price offset")?;
        if self.execution.price_offset >= 1.0 {
            return Err(
                MarketMakerError::Configuration("Price offset must be below 1.0".to_string()).into(),
            );
        }

        ConfigValidator::validate_positive(
            self.scheduling.main_loop_interval_ms as f64,
            "Main loop interval",
        )?;
        ConfigValidator::validate_positive(
            self.scheduling.performance_interval_ms as f64,
            "Performance interval",
        )?;
        ConfigValidator::validate_positive(
            self.scheduling.correlation_interval_ms as f64,
            "Correlation interval",
        )?;

        let weight_total = self.ranking.weights.total();
        if (weight_total - 1.0).abs() > 1e-6 {
            warn!(
                weight_total,
                "Ranking weights do not sum to 1.0; final scores will be scaled accordingly"
            );
        }

        Ok(())
    }
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            trading: TradingConfig {
                pairs: vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
                budget: 1000.0,
                quote_currency: default_quote_currency(),
                position_size_fraction: default_position_size_fraction(),
            },
            data: DataConfig::default(),
            detection: DetectionConfig::default(),
            ranking: RankingConfig::default(),
            risk: RiskConfig::default(),
            execution: ExecutionConfig::default(),
            scheduling: SchedulingConfig::default(),
        }
    }
}
