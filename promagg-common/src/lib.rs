//! promagg Common Library
//!
//! This crate provides the exposition-format building blocks used by the
//! promagg aggregator:
//!
//! - [`model`] - Metric family data model (`MetricFamily`, `Metric`, `LabelPair`)
//! - [`parse`] - Text exposition format parser
//! - [`encode`] - Text and delimited protobuf encoders, `Accept` negotiation
//! - [`config`] - Logging configuration
//! - [`error`] - Error types

pub mod config;
pub mod encode;
pub mod error;
pub mod model;
pub mod parse;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig};
pub use encode::{EncodeError, Encoder, Format, ProtoEncoder, TextEncoder, encode_families};
pub use error::{Error, Result};
pub use model::{
    Bucket, Histogram, LabelPair, Metric, MetricFamily, MetricType, MetricValue, Quantile, Summary,
};
pub use parse::{ParseError, is_valid_label_name, is_valid_metric_name, parse_text};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Example
///
/// ```ignore
/// use promagg_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
