//! promagg: Prometheus metrics aggregation proxy.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use promagg::{Aggregator, AggregatorConfig, HttpServer};

/// Prometheus metrics aggregation proxy.
#[derive(Parser, Debug)]
#[command(name = "promagg")]
#[command(about = "Scrape many Prometheus exporters and serve one merged /metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short = 'f', long)]
    config: String,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Per-exporter timeout in milliseconds (overrides config).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Provenance label name (overrides config).
    #[arg(long)]
    label_key: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut AggregatorConfig) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.fetch.timeout_ms = timeout_ms;
        }
        if let Some(label_key) = self.label_key {
            config.fetch.label_key = label_key;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration, then re-validate with CLI overrides applied
    let mut config = AggregatorConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    promagg_common::init_tracing(&config.logging)?;

    info!(
        exporters = config.exporters.len(),
        timeout_ms = config.fetch.timeout_ms,
        label_key = %config.fetch.label_key,
        "Starting promagg"
    );

    let listen_addr: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let aggregator = Aggregator::new(config.exporters, config.fetch)?;
    let http_server = HttpServer::new(aggregator, listen_addr, config.server.path);

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start HTTP server
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    // Wait for a shutdown signal, or for the server to fail on its own
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        res = &mut http_task => {
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("HTTP server error: {}", e);
                    Err(e)
                }
                Err(e) => Err(e.into()),
            };
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for the server to drain
    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
        Ok(_) => {}
        Err(_) => warn!("HTTP server did not stop within 5s"),
    }

    info!("promagg stopped");
    Ok(())
}

/// Resolves when SIGTERM is received; never on non-unix targets.
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "promagg",
            "-f",
            "promagg.json5",
            "--listen",
            "127.0.0.1:9999",
            "--timeout-ms",
            "250",
            "--label-key",
            "exporter",
        ]);
        assert_eq!(args.config, "promagg.json5");

        let mut config = AggregatorConfig::default();
        args.apply(&mut config);

        assert_eq!(config.server.listen, "127.0.0.1:9999");
        assert_eq!(config.fetch.timeout_ms, 250);
        assert_eq!(config.fetch.label_key, "exporter");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_flag_is_required() {
        assert!(Args::try_parse_from(["promagg"]).is_err());
    }
}
