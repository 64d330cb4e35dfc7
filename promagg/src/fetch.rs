//! Concurrent scraping of all configured exporters.
//!
//! One tokio task is spawned per exporter. Every task reports exactly one
//! [`FetchResult`] into a bounded channel sized to the exporter count, so no
//! task ever blocks on send, and the driver drains exactly that many results
//! before returning. Tasks live in a [`JoinSet`]; dropping a scrape that is
//! still in flight (for example because the HTTP client went away) aborts
//! them.

use std::sync::Arc;
use std::time::Duration;

use promagg_common::MetricFamily;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ExporterEndpoint, FetchConfig};
use crate::merge::merge_families;
use crate::provenance::{ProvenanceError, parse_with_provenance};

/// `Accept` header sent to exporters.
const EXPORTER_ACCEPT: &str = "text/plain; version=0.0.4";

/// Errors that exclude a single exporter from one scrape.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("scrape cancelled")]
    Cancelled,

    #[error(transparent)]
    Body(#[from] ProvenanceError),
}

/// Outcome of scraping one exporter.
#[derive(Debug)]
pub struct FetchResult {
    pub exporter: String,
    pub families: Result<Vec<MetricFamily>, FetchError>,
}

/// Parent context of a scrape: an optional deadline and a cancel signal.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    /// Hard deadline for every fetch of this scrape.
    pub deadline: Option<Instant>,
    /// Fetches resolve immediately with [`FetchError::Cancelled`] once this flips to `true`.
    pub cancel: watch::Receiver<bool>,
}

impl ScrapeContext {
    pub fn new(cancel: watch::Receiver<bool>) -> Self {
        Self {
            deadline: None,
            cancel,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A context that is never cancelled and has no deadline.
    pub fn detached() -> Self {
        // The receiver keeps the last value after the sender is dropped.
        let (_tx, rx) = watch::channel(false);
        Self::new(rx)
    }

    /// Effective deadline for one fetch started now.
    fn fetch_deadline(&self, timeout: Duration) -> Instant {
        let own = Instant::now() + timeout;
        match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        }
    }
}

/// Scrapes exporters and produces labelled metric families.
#[derive(Debug, Clone)]
pub struct Aggregator {
    client: reqwest::Client,
    exporters: Arc<[ExporterEndpoint]>,
    config: Arc<FetchConfig>,
}

impl Aggregator {
    /// Create an aggregator with a shared HTTP client.
    pub fn new(exporters: Vec<ExporterEndpoint>, config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("promagg/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            exporters: exporters.into(),
            config: Arc::new(config),
        })
    }

    /// Scrape every exporter and return the merged, ordered families.
    pub async fn scrape(&self, ctx: &ScrapeContext) -> Vec<MetricFamily> {
        let families = self.gather(ctx).await;
        let merged = merge_families(families);
        debug!(families = merged.len(), "Scrape merged");
        merged
    }

    /// Scrape every exporter and concatenate the families of those that succeeded.
    pub async fn gather(&self, ctx: &ScrapeContext) -> Vec<MetricFamily> {
        let expected = self.exporters.len();
        // mpsc channels need a non-zero capacity.
        let (tx, mut rx) = mpsc::channel(expected.max(1));
        let mut tasks = JoinSet::new();

        for exporter in self.exporters.iter().cloned() {
            let tx = tx.clone();
            let client = self.client.clone();
            let config = self.config.clone();
            let deadline = ctx.fetch_deadline(config.timeout());
            let cancel = ctx.cancel.clone();

            tasks.spawn(async move {
                let families = fetch_exporter(&client, &exporter, &config, deadline, cancel).await;
                // Capacity equals the exporter count, so this never waits.
                let _ = tx
                    .send(FetchResult {
                        exporter: exporter.name,
                        families,
                    })
                    .await;
            });
        }
        drop(tx);

        let mut out = Vec::new();
        let mut succeeded = 0usize;
        for _ in 0..expected {
            // `None` only if a task died without reporting.
            let Some(result) = rx.recv().await else {
                break;
            };
            match result.families {
                Ok(families) => {
                    succeeded += 1;
                    out.extend(families);
                }
                Err(e) => {
                    warn!(exporter = %result.exporter, error = %e, "Exporter returned error");
                }
            }
        }

        debug!(
            exporters = expected,
            succeeded,
            families = out.len(),
            "Gathered exporter metrics"
        );
        out
    }
}

/// Fetch and parse one exporter, bounded by `deadline` and `cancel`.
async fn fetch_exporter(
    client: &reqwest::Client,
    exporter: &ExporterEndpoint,
    config: &FetchConfig,
    deadline: Instant,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<MetricFamily>, FetchError> {
    let budget = deadline.saturating_duration_since(Instant::now());
    debug!(exporter = %exporter.name, url = %exporter.url, ?budget, "Fetching");

    if *cancel.borrow() {
        return Err(FetchError::Cancelled);
    }

    let body = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => return Err(FetchError::Cancelled),
        res = tokio::time::timeout_at(deadline, fetch_body(client, &exporter.url)) => match res {
            Ok(body) => body,
            Err(_) => return Err(FetchError::Timeout(budget)),
        },
    };

    let body = body.inspect_err(|e| {
        debug!(exporter = %exporter.name, url = %exporter.url, error = %e, "HTTP GET failed");
    })?;

    parse_with_provenance(&body, &config.label_key, &exporter.name)
        .inspect_err(|e| {
            debug!(exporter = %exporter.name, url = %exporter.url, error = %e, "Parse failed");
        })
        .map_err(FetchError::from)
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).header(ACCEPT, EXPORTER_ACCEPT).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    Ok(response.bytes().await?.to_vec())
}

/// Resolves once the cancel flag is set; never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
