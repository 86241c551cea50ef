//! Logging utilities

use crate::{MarketMakerError, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initialize console and daily-rotated file logging. `RUST_LOG` overrides `log_level`.
pub fn init<P: AsRef<Path>>(log_level: &str, log_file: P) -> Result<()> {
    let log_file = log_file.as_ref();
    let directory = log_file.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(directory)?;

    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        directory,
        log_file.file_name().unwrap_or(std::ffi::OsStr::new("leadlag.log")),
    );

    let console_layer = fmt::layer().with_target(true).with_thread_ids(true);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| MarketMakerError::Configuration(format!("Logger already initialized: {}", e)))?;

    Ok(())
}

/// Log an order placement with structured fields
#[macro_export]
macro_rules! log_trade {
    ($level:ident, $symbol:expr, $side:expr, $quantity:expr, $price:expr, $($field:tt)*) => {
        tracing::$level!(
            symbol = %$symbol,
            side = %$side,
            quantity = %$quantity,
            price = %$price,
            $($field)*
        );
    };
}

/// Log a detected futures-lead signal with structured fields
#[macro_export]
macro_rules! log_signal {
    ($level:ident, $pair:expr, $direction:expr, $magnitude_pct:expr, $($field:tt)*) => {
        tracing::$level!(
            pair = %$pair,
            direction = %$direction,
            magnitude_pct = %$magnitude_pct,
            $($field)*
        );
    };
}

/// Log risk information with structured fields
#[macro_export]
macro_rules! log_risk {
    ($level:ident, $risk_type:expr, $value:expr, $threshold:expr, $($field:tt)*) => {
        tracing::$level!(
            risk_type = %$risk_type,
            value = %$value,
            threshold = %$threshold,
            $($field)*
        );
    };
}
