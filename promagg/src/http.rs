//! HTTP server for the aggregated metrics endpoint.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use promagg_common::{Format, encode_families};
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::HEALTH_PATHS;
use crate::fetch::{Aggregator, ScrapeContext};

/// Header Prometheus sends with the scrape timeout it will enforce.
const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    aggregator: Aggregator,
    shutdown: watch::Receiver<bool>,
}

/// Create the HTTP router.
fn create_router(
    aggregator: Aggregator,
    shutdown: watch::Receiver<bool>,
    metrics_path: &str,
) -> Router {
    let state = AppState {
        aggregator,
        shutdown,
    };

    let mut router = Router::new().route(metrics_path, get(metrics_handler));
    for path in HEALTH_PATHS {
        router = router.route(path, get(health_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut ctx = ScrapeContext::new(state.shutdown.clone());
    if let Some(timeout) = scrape_timeout(&headers) {
        debug!(?timeout, "Using scrape timeout from request");
        ctx = ctx.with_deadline(Instant::now() + timeout);
    }

    let families = state.aggregator.scrape(&ctx).await;

    let format = Format::negotiate(headers.get(ACCEPT).and_then(|v| v.to_str().ok()));
    match encode_families(&families, format) {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, format.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode aggregated metrics");
            error_response(e)
        }
    }
}

/// Handler for `/` and `/healthcheck`.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK\n").into_response()
}

/// Plain-text 500 carrying the error message.
fn error_response(err: impl Display) -> Response {
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("An error has occurred while serving metrics:\n\n{}", err),
    )
        .into_response();
    response.headers_mut().remove(CONTENT_ENCODING);
    response
}

/// Scrape timeout announced by the client, if any and positive.
fn scrape_timeout(headers: &HeaderMap) -> Option<Duration> {
    let secs: f64 = headers
        .get(SCRAPE_TIMEOUT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    aggregator: Aggregator,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(aggregator: Aggregator, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            aggregator,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    ///
    /// In-flight scrapes observe the same signal and stop waiting on exporters.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.aggregator, shutdown.clone(), &self.metrics_path);
        let addr = listener.local_addr()?;

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown.borrow_and_update() {
                        break;
                    }
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use promagg_common::encode::PROTO_DELIMITED_CONTENT_TYPE;
    use tower::ServiceExt;

    fn make_router(metrics_path: &str) -> Router {
        let aggregator = Aggregator::new(Vec::new(), FetchConfig::default()).unwrap();
        let (_tx, rx) = watch::channel(false);
        create_router(aggregator, rx, metrics_path)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint_without_exporters() {
        let router = make_router("/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        for path in ["/", "/healthcheck"] {
            let response = make_router("/metrics")
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "OK\n");
        }
    }

    #[tokio::test]
    async fn test_protobuf_is_negotiated() {
        let router = make_router("/metrics");

        let response = router
            .oneshot(
                Request::get("/metrics")
                    .header(
                        "accept",
                        "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited;q=0.7,text/plain;version=0.0.4;q=0.3",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            PROTO_DELIMITED_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn test_malformed_accept_weights_fall_back_to_text() {
        let accept = vec!["application/json;q=NaN"; 64].join(",");
        let response = make_router("/metrics")
            .oneshot(
                Request::get("/metrics")
                    .header("accept", accept)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = make_router("/federate");

        let response = router
            .clone()
            .oneshot(Request::get("/federate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_error_response() {
        let response = error_response("boom");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(
            body_string(response).await,
            "An error has occurred while serving metrics:\n\nboom"
        );
    }

    #[test]
    fn test_scrape_timeout_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(scrape_timeout(&headers), None);

        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("2.5"));
        assert_eq!(scrape_timeout(&headers), Some(Duration::from_millis(2500)));

        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("0"));
        assert_eq!(scrape_timeout(&headers), None);

        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("soon"));
        assert_eq!(scrape_timeout(&headers), None);
    }
}
