//! Configuration for the aggregator.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use promagg_common::{LoggingConfig, is_valid_label_name};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Paths served by the health check handler.
pub const HEALTH_PATHS: [&str; 2] = ["/", "/healthcheck"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete aggregator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Exporters to scrape, in configuration order.
    #[serde(default)]
    pub exporters: Vec<ExporterEndpoint>,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Fetch settings shared by all exporters.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A single exporter to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExporterEndpoint {
    /// Unique name; becomes the provenance label value.
    pub name: String,

    /// Full URL of the exporter's metrics endpoint.
    pub url: String,
}

impl ExporterEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (default: "0.0.0.0:9560").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the aggregated metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9560".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Exporter fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-exporter request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Label name identifying the exporter a sample came from.
    #[serde(default = "default_label_key")]
    pub label_key: String,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_label_key() -> String {
    "agent".to_string()
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            label_key: default_label_key(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AggregatorConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::with_capacity(self.exporters.len());
        for exporter in &self.exporters {
            if exporter.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Exporter with url {} has an empty name",
                    exporter.url
                )));
            }
            if !seen.insert(exporter.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Exporter name {} is not unique",
                    exporter.name
                )));
            }

            let url = reqwest::Url::parse(&exporter.url).map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid url for exporter {}: {}",
                    exporter.name, e
                ))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Validation(format!(
                    "Exporter {} url must be http or https, got {}",
                    exporter.name,
                    url.scheme()
                )));
            }
        }

        if self.fetch.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if !is_valid_label_name(&self.fetch.label_key) || self.fetch.label_key.starts_with("__") {
            return Err(ConfigError::Validation(format!(
                "Invalid label key: {}",
                self.fetch.label_key
            )));
        }

        // Validate listen address format
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.server.listen
            )));
        }

        // Validate path starts with /
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if HEALTH_PATHS.contains(&self.server.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved for health checks",
                self.server.path
            )));
        }

        Ok(())
    }
}
