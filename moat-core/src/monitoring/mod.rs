//! Monitoring and observability
//!
//! Prometheus metrics for all four resilience mechanisms plus the HTTP
//! operational surface: metrics scraping, health checks, the route health
//! report, and the route reset command.

pub mod metrics;
pub mod server;

pub use metrics::{
    HedgeMetrics, MetricsRegistry, OracleMetrics, RouteMetrics, StreamMetrics,
};
pub use server::{StatusServer, StatusServerConfig};
