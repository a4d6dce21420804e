//! Moat Core - Resilient External-Dependency Layer
//!
//! Moat keeps an automated trading engine working correctly while the
//! services it depends on (a live event stream, gas price oracles, and
//! execution venues for hedging) are unreliable, slow, or intermittently
//! unavailable. It makes liveness, backoff, and fallback-ordering decisions
//! under partial failure without ever blocking the caller indefinitely and
//! without hammering dependencies that are already degraded.
//!
//! ## Architecture
//! Four mechanisms share one primitive (bounded exponential backoff) and one
//! policy shape (failure-count-driven state transition):
//! - **Stream reconnection**: keeps a long-lived event stream attached,
//!   backing off between attempts and resetting on the first delivered event
//! - **Gas oracle**: resolves a volatile value from priority-ordered sources
//!   with a TTL cache, confidence grading, and a last-resort fallback
//! - **Route health**: per-route failure counters that demote and blacklist
//!   unreliable (chain, venue, pair) routes until an operator resets them
//! - **Hedge retrier**: a small bounded retry loop around safety-critical
//!   actions that escalates loudly instead of failing silently
//!
//! ## Core Modules
//! - `backoff`: capped exponential backoff, embedded by the stateful loops
//! - `reconnect`: stream controller with interruptible backoff sleeps
//! - `oracle`: multi-source value resolution with per-key miss coalescing
//! - `routes`: concurrent route health registry and reporting
//! - `hedge`: bounded critical-action retries with escalation records
//! - `alerts`: severity-graded alert sink (console, JSONL file)
//! - `monitoring`: Prometheus metrics and the HTTP operational surface
//! - `shutdown`: cooperative cancellation observed by every backoff sleep

pub mod alerts;
pub mod backoff;
pub mod config;
pub mod hedge;
pub mod logging;
pub mod monitoring;
pub mod oracle;
pub mod reconnect;
pub mod routes;
pub mod shutdown;

// Re-export the types most callers wire together
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use hedge::{Escalation, ExecutionError, HedgeRetrier, RetryPolicy};
pub use oracle::{Confidence, GasOracle, OracleConfig, SourceError, SourcedValue};
pub use reconnect::{
    ConnectionState, EventSource, EventStream, ReconnectConfig, StreamController, StreamError,
};
pub use routes::{RouteHealthTracker, RouteId, RouteState, TrackerConfig};
pub use shutdown::ShutdownSwitch;

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::alerts::{Alert, AlertCategory, AlertManager, AlertSeverity};
    pub use crate::backoff::{BackoffConfig, ExponentialBackoff};
    pub use crate::hedge::{Escalation, HedgeRetrier, RetryPolicy};
    pub use crate::monitoring::MetricsRegistry;
    pub use crate::oracle::{Confidence, GasOracle, OracleConfig, SourcedValue};
    pub use crate::reconnect::{EventSource, EventStream, StreamController};
    pub use crate::routes::{RouteHealthTracker, RouteId, RouteState};
    pub use crate::shutdown::ShutdownSwitch;
    pub use crate::{Error, Result};
}
