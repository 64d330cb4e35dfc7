//! Prometheus metrics aggregation proxy.
//!
//! On every request to its metrics endpoint, promagg scrapes a fixed set of
//! exporters concurrently, labels each sample with the exporter it came from,
//! merges same-named families and answers with one combined exposition.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Exporters     │────>│   Aggregator    │────>│      Merge      │────>│   HTTP Server   │
//! │ (text format)   │     │ (fetch + label) │     │ (sort + fold)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! An exporter that times out, answers with a non-2xx status, or sends a body
//! that does not parse is left out of that one response; the others are
//! still served.
//!
//! # Usage
//!
//! ```bash
//! promagg --config promagg.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::AggregatorConfig`] for configuration options.

pub mod config;
pub mod fetch;
pub mod http;
pub mod merge;
pub mod provenance;

pub use config::{AggregatorConfig, ExporterEndpoint};
pub use fetch::{Aggregator, FetchError, FetchResult, ScrapeContext};
pub use http::HttpServer;
pub use merge::merge_families;
pub use provenance::{ProvenanceError, parse_with_provenance};
