use clap::{Parser, Subcommand};
use futures_lead_mm::{
    config::MarketMakerConfig,
    connectors::{PaperExchange, PaperExchangeConfig},
    orchestrator::{OrchestratorBuilder, OrchestratorEvent},
    persistence::MemoryStore,
    utils::logger,
    Result,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "leadlag")]
#[command(about = "Futures-lead multi-pair market maker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/leadlag.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/leadlag.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run against the simulated paper exchange
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Seed for the simulated price walk
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    logger::init(&cli.log_level, &cli.log_file)?;

    info!("Starting {} v{}", futures_lead_mm::APP_NAME, futures_lead_mm::VERSION);

    let config = MarketMakerConfig::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config.display());

    match cli.command {
        Commands::Run {
            duration_secs,
            metrics_port,
            seed,
        } => run_paper(config, duration_secs, metrics_port, seed).await,
        Commands::Validate => validate_config(config),
    }
}

async fn run_paper(
    config: MarketMakerConfig,
    duration_secs: Option<u64>,
    metrics_port: Option<u16>,
    seed: u64,
) -> Result<()> {
    if let Some(port) = metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!("Prometheus exporter listening on {}", addr),
            Err(e) => warn!("Prometheus exporter not started on {}: {}", addr, e),
        }
    }

    let exchange = Arc::new(PaperExchange::new(PaperExchangeConfig {
        pairs: config.trading.pairs.clone(),
        quote_currency: config.trading.quote_currency.clone(),
        initial_balance: config.trading.budget,
        seed,
        ..PaperExchangeConfig::default()
    }));
    let store = Arc::new(MemoryStore::new());

    let orchestrator = OrchestratorBuilder::new(config)
        .exchange(exchange)
        .store(store.clone())
        .build()?;

    let mut events = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let OrchestratorEvent::TradeExecuted {
                opportunity,
                order,
                execution_time_ms,
            } = event
            {
                info!(
                    pair = %opportunity.pair,
                    order_id = %order.id,
                    price = order.price,
                    amount = order.amount,
                    execution_time_ms,
                    "Trade executed"
                );
            }
        }
    });

    orchestrator.start().await?;

    match duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }

    orchestrator.performance_snapshot().await;
    orchestrator.stop().await?;
    reporter.abort();

    let state = orchestrator.portfolio_state().await;
    info!(
        "Session finished: {} stored trades, {} open positions, exposure {:.2}",
        store.opportunities().await.len(),
        state.positions.len(),
        state.total_exposure()
    );

    Ok(())
}

fn validate_config(config: MarketMakerConfig) -> Result<()> {
    info!("Validating configuration...");

    match config.validate() {
        Ok(()) => {
            info!("Configuration is valid");
            println!("Configuration validation passed!");
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(e)
        }
    }
}
