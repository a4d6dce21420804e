//! Prometheus metrics for the dependency layer
//!
//! One family per mechanism:
//! - stream: reconnection behavior and delivered events
//! - oracle: per-source fetch outcomes, cache efficiency, fallback use
//! - routes: per-route state and outcome counters
//! - hedge: critical-action attempts and escalations

use prometheus::{GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "moat";

/// Central registry for all metric families
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    stream: Arc<StreamMetrics>,
    oracle: Arc<OracleMetrics>,
    routes: Arc<RouteMetrics>,
    hedge: Arc<HedgeMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let stream = Arc::new(StreamMetrics::new(&registry)?);
        let oracle = Arc::new(OracleMetrics::new(&registry)?);
        let routes = Arc::new(RouteMetrics::new(&registry)?);
        let hedge = Arc::new(HedgeMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            stream,
            oracle,
            routes,
            hedge,
        })
    }

    /// Get the underlying Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stream(&self) -> &StreamMetrics {
        &self.stream
    }

    pub fn oracle(&self) -> &OracleMetrics {
        &self.oracle
    }

    pub fn routes(&self) -> &RouteMetrics {
        &self.routes
    }

    pub fn hedge(&self) -> &HedgeMetrics {
        &self.hedge
    }
}

/// Event stream connectivity metrics
pub struct StreamMetrics {
    /// Stream open attempts
    pub connect_attempts_total: IntCounter,
    /// Successful attaches
    pub connects_total: IntCounter,
    /// Attempts that failed before attaching
    pub connect_failures_total: IntCounter,
    /// Streams lost after attaching
    pub disconnects_total: IntCounter,
    /// Events delivered to the engine
    pub events_total: IntCounter,
    /// 1 while attached, 0 otherwise
    pub connected: IntGauge,
}

impl StreamMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let connect_attempts_total = IntCounter::with_opts(
            Opts::new("stream_connect_attempts_total", "Stream open attempts")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(connect_attempts_total.clone()))?;

        let connects_total = IntCounter::with_opts(
            Opts::new("stream_connects_total", "Successful stream attaches").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(connects_total.clone()))?;

        let connect_failures_total = IntCounter::with_opts(
            Opts::new(
                "stream_connect_failures_total",
                "Stream attempts that failed before attaching",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(connect_failures_total.clone()))?;

        let disconnects_total = IntCounter::with_opts(
            Opts::new("stream_disconnects_total", "Streams lost after attaching")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(disconnects_total.clone()))?;

        let events_total = IntCounter::with_opts(
            Opts::new("stream_events_total", "Events delivered to the engine")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let connected = IntGauge::with_opts(
            Opts::new("stream_connected", "1 while the stream is attached").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(connected.clone()))?;

        Ok(Self {
            connect_attempts_total,
            connects_total,
            connect_failures_total,
            disconnects_total,
            events_total,
            connected,
        })
    }
}

/// Value oracle metrics
pub struct OracleMetrics {
    /// Fetch attempts per source
    pub fetch_attempts_total: IntCounterVec,
    /// Fetch failures per source and reason
    pub fetch_failures_total: IntCounterVec,
    /// Answers served from a fresh cache entry
    pub cache_hits_total: IntCounter,
    /// Lookups that had to consult sources
    pub cache_misses_total: IntCounter,
    /// Answers degraded to the fallback value
    pub fallback_served_total: IntCounter,
    /// Lookups that piggybacked on an in-flight fetch
    pub coalesced_waits_total: IntCounter,
    /// Last accepted price per key, in gwei
    pub last_price_gwei: GaugeVec,
}

impl OracleMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let fetch_attempts_total = IntCounterVec::new(
            Opts::new("oracle_fetch_attempts_total", "Fetch attempts per source")
                .namespace(NAMESPACE),
            &["source"],
        )?;
        registry.register(Box::new(fetch_attempts_total.clone()))?;

        let fetch_failures_total = IntCounterVec::new(
            Opts::new(
                "oracle_fetch_failures_total",
                "Fetch failures per source and reason",
            )
            .namespace(NAMESPACE),
            &["source", "reason"],
        )?;
        registry.register(Box::new(fetch_failures_total.clone()))?;

        let cache_hits_total = IntCounter::with_opts(
            Opts::new("oracle_cache_hits_total", "Answers served from cache").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(cache_hits_total.clone()))?;

        let cache_misses_total = IntCounter::with_opts(
            Opts::new("oracle_cache_misses_total", "Lookups that consulted sources")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(cache_misses_total.clone()))?;

        let fallback_served_total = IntCounter::with_opts(
            Opts::new(
                "oracle_fallback_served_total",
                "Answers degraded to the fallback value",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(fallback_served_total.clone()))?;

        let coalesced_waits_total = IntCounter::with_opts(
            Opts::new(
                "oracle_coalesced_waits_total",
                "Lookups that piggybacked on an in-flight fetch",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(coalesced_waits_total.clone()))?;

        let last_price_gwei = GaugeVec::new(
            Opts::new("oracle_last_price_gwei", "Last accepted price per key")
                .namespace(NAMESPACE),
            &["key"],
        )?;
        registry.register(Box::new(last_price_gwei.clone()))?;

        Ok(Self {
            fetch_attempts_total,
            fetch_failures_total,
            cache_hits_total,
            cache_misses_total,
            fallback_served_total,
            coalesced_waits_total,
            last_price_gwei,
        })
    }
}

/// Route health metrics
pub struct RouteMetrics {
    /// Per-route state: 0 healthy, 1 degraded, 2 blacklisted
    pub route_state: IntGaugeVec,
    /// Successful operations per route
    pub successes_total: IntCounterVec,
    /// Failed operations per route
    pub failures_total: IntCounterVec,
    /// Manual and cooldown resets
    pub resets_total: IntCounter,
}

impl RouteMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let route_state = IntGaugeVec::new(
            Opts::new(
                "route_state",
                "Route health state (0 healthy, 1 degraded, 2 blacklisted)",
            )
            .namespace(NAMESPACE),
            &["route"],
        )?;
        registry.register(Box::new(route_state.clone()))?;

        let successes_total = IntCounterVec::new(
            Opts::new("route_successes_total", "Successful operations per route")
                .namespace(NAMESPACE),
            &["route"],
        )?;
        registry.register(Box::new(successes_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new("route_failures_total", "Failed operations per route").namespace(NAMESPACE),
            &["route"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let resets_total = IntCounter::with_opts(
            Opts::new("route_resets_total", "Manual and cooldown route resets")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(resets_total.clone()))?;

        Ok(Self {
            route_state,
            successes_total,
            failures_total,
            resets_total,
        })
    }
}

/// Critical-action retry metrics
pub struct HedgeMetrics {
    /// Action attempts, including first tries
    pub attempts_total: IntCounter,
    /// Backoff retries after a failed attempt
    pub retries_total: IntCounter,
    /// Retry loops that exhausted their attempts
    pub escalations_total: IntCounter,
}

impl HedgeMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let attempts_total = IntCounter::with_opts(
            Opts::new("hedge_attempts_total", "Critical action attempts").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let retries_total = IntCounter::with_opts(
            Opts::new("hedge_retries_total", "Retries after a failed attempt")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let escalations_total = IntCounter::with_opts(
            Opts::new(
                "hedge_escalations_total",
                "Retry loops that exhausted their attempts",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(escalations_total.clone()))?;

        Ok(Self {
            attempts_total,
            retries_total,
            escalations_total,
        })
    }
}
