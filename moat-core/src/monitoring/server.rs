//! HTTP operational surface
//!
//! A lightweight server exposing:
//! - `GET /metrics` - Prometheus text format for scraping
//! - `GET /health`  - liveness probe
//! - `GET /routes`  - route health report as JSON
//! - `POST /routes/reset?route=chain:venue:pair` - force a route healthy
//! - `POST /routes/reset?all=true` - reset every route
//!
//! Resetting an unknown route answers 404 with a "not found" body; that is
//! an outcome for the operator, not a tool failure.

use crate::routes::{RouteHealthTracker, RouteId};
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::MetricsRegistry;

/// Configuration for the status server
#[derive(Debug, Clone)]
pub struct StatusServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:9464")
    pub listen_addr: SocketAddr,
}

impl Default for StatusServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9464".parse().expect("static addr"),
        }
    }
}

/// HTTP server over the metrics registry and the route tracker
pub struct StatusServer {
    config: StatusServerConfig,
    metrics: Arc<MetricsRegistry>,
    tracker: Arc<RouteHealthTracker>,
}

impl StatusServer {
    pub fn new(
        config: StatusServerConfig,
        metrics: Arc<MetricsRegistry>,
        tracker: Arc<RouteHealthTracker>,
    ) -> Self {
        Self {
            config,
            metrics,
            tracker,
        }
    }

    /// Serve forever. Spawn this on the tokio runtime next to the engine.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .context("Failed to bind status server")?;

        info!(
            "Status server listening on http://{} (/metrics, /health, /routes)",
            self.config.listen_addr
        );

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let metrics = Arc::clone(&self.metrics);
            let tracker = Arc::clone(&self.tracker);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = Arc::clone(&metrics);
                    let tracker = Arc::clone(&tracker);
                    async move { handle_request(req, metrics, tracker) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<MetricsRegistry>,
    tracker: Arc<RouteHealthTracker>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    debug!("Status request: {} {}", req.method(), path);

    let (status, content_type, body) = match (req.method(), path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            (StatusCode::OK, "text/plain", "OK".to_string())
        }
        (&Method::GET, "/metrics") => match encode_metrics(&metrics) {
            Ok(text) => (StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    format!("Error: {}", e),
                )
            }
        },
        (&Method::GET, "/routes") => match routes_json(&tracker) {
            Ok(body) => (StatusCode::OK, "application/json", body),
            Err(e) => {
                error!("Failed to render route report: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "application/json",
                    json!({ "error": e.to_string() }).to_string(),
                )
            }
        },
        (&Method::POST, "/routes/reset") => {
            let (status, body) = apply_reset(&tracker, req.uri().query());
            (status, "application/json", body)
        }
        (&Method::GET, "/") => (
            StatusCode::OK,
            "text/plain",
            "Moat dependency layer\n\nEndpoints:\n  /metrics - Prometheus metrics\n  /health - Health check\n  /routes - Route health report (JSON)\n  POST /routes/reset?route=chain:venue:pair - Reset a route\n"
                .to_string(),
        ),
        _ => {
            warn!("Unknown status endpoint requested: {}", path);
            (StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())
        }
    };

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Full::new(Bytes::from(body)))
        .expect("static response parts"))
}

/// Encode the registry to Prometheus text format
fn encode_metrics(metrics: &MetricsRegistry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;

    String::from_utf8(buffer).context("Invalid UTF-8 in metrics")
}

/// Render the route report as JSON
fn routes_json(tracker: &RouteHealthTracker) -> Result<String> {
    serde_json::to_string_pretty(&tracker.report()).context("Failed to serialize route report")
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some(key), Some(value)) if key == name => Some(value),
            _ => None,
        }
    })
}

/// Execute a reset request. Separated from the hyper plumbing so the outcome
/// contract is unit-testable.
fn apply_reset(tracker: &RouteHealthTracker, query: Option<&str>) -> (StatusCode, String) {
    let Some(query) = query else {
        return (
            StatusCode::BAD_REQUEST,
            json!({ "error": "missing route parameter" }).to_string(),
        );
    };

    if query_param(query, "all") == Some("true") {
        let count = tracker.reset_all();
        info!(count, "Reset all routes via operator surface");
        return (StatusCode::OK, json!({ "reset": count }).to_string());
    }

    let Some(raw) = query_param(query, "route") else {
        return (
            StatusCode::BAD_REQUEST,
            json!({ "error": "missing route parameter" }).to_string(),
        );
    };

    let route: RouteId = match raw.parse() {
        Ok(route) => route,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                json!({ "error": e.to_string() }).to_string(),
            );
        }
    };

    if tracker.reset(&route) {
        (
            StatusCode::OK,
            json!({ "route": route.to_string(), "reset": true }).to_string(),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            json!({ "route": route.to_string(), "reset": false, "error": "not found" })
                .to_string(),
        )
    }
}
