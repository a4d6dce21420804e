//! Multi-source gas price oracle
//!
//! Resolves a volatile external value from a priority-ordered list of
//! sources, caches the last good answer per key with a TTL, and grades every
//! answer with the confidence of the source that produced it. `get` never
//! fails and never blocks past the summed per-source timeouts: when every
//! real source is down the caller still gets the configured fallback value,
//! tagged low-confidence and never cached, so real sources are retried on
//! the very next call.
//!
//! Concurrent misses for the same key are coalesced: the first caller walks
//! the sources while the rest wait on the in-flight result, so cache expiry
//! under load costs one fetch sequence, not one per caller.

pub mod sources;

pub use sources::{
    EtherscanGasSource, GasPriceSource, JsonRpcGasSource, SourceError, StaticGasSource,
};

use crate::monitoring::MetricsRegistry;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Source name attached to fallback answers
pub const FALLBACK_SOURCE: &str = "fallback";

/// How trustworthy a fetched value is, derived from its source tier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A resolved value with its provenance
#[derive(Debug, Clone)]
pub struct SourcedValue {
    /// Gas price in gwei
    pub value: f64,
    /// Name of the source that produced it
    pub source: String,
    pub confidence: Confidence,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl SourcedValue {
    /// Fresh iff younger than its TTL. Fallback answers carry a zero TTL and
    /// are never fresh.
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Oracle configuration
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Cache lifetime of a good answer. Short enough to track a fast-moving
    /// gas market, long enough to bound call volume.
    pub ttl: Duration,
    /// Served (low-confidence) when every source fails
    pub fallback_value: f64,
    /// Values above this are rejected as a source failure
    pub max_plausible: f64,
    /// Extra wait budget granted to coalesced waiters beyond the summed
    /// source timeouts
    pub wait_slack: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(12),
            fallback_value: 30.0,
            max_plausible: 10_000.0,
            wait_slack: Duration::from_millis(250),
        }
    }
}

/// Oracle counters
#[derive(Default)]
struct OracleStats {
    hits: AtomicU64,
    misses: AtomicU64,
    fallback_served: AtomicU64,
    coalesced_waits: AtomicU64,
}

/// Point-in-time copy of the oracle counters
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub fallback_served: u64,
    pub coalesced_waits: u64,
}

/// Shared slot for a fetch in progress; waiters block on the condvar until
/// the leader publishes.
#[derive(Default)]
struct Inflight {
    slot: Mutex<Option<SourcedValue>>,
    cv: Condvar,
}

#[derive(Default)]
struct CacheEntry {
    value: Option<SourcedValue>,
    inflight: Option<Arc<Inflight>>,
}

enum MissRole {
    Leader(Arc<Inflight>),
    Waiter(Arc<Inflight>),
}

/// Priority-ordered, caching, never-failing value oracle
pub struct GasOracle {
    config: OracleConfig,
    sources: Vec<Arc<dyn GasPriceSource>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    stats: OracleStats,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl GasOracle {
    /// Create an oracle over `sources` in priority order (first = preferred)
    pub fn new(config: OracleConfig, sources: Vec<Arc<dyn GasPriceSource>>) -> Self {
        Self {
            config,
            sources,
            cache: Mutex::new(HashMap::new()),
            stats: OracleStats::default(),
            metrics: None,
        }
    }

    /// Publish oracle counters to a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Names of the configured sources, in priority order
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Oracle counters
    pub fn stats(&self) -> OracleStatsSnapshot {
        OracleStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            fallback_served: self.stats.fallback_served.load(Ordering::Relaxed),
            coalesced_waits: self.stats.coalesced_waits.load(Ordering::Relaxed),
        }
    }

    /// Resolve the value for `key`. Never fails; worst case is the fallback
    /// value at low confidence after the summed source timeouts.
    pub fn get(&self, key: &str) -> SourcedValue {
        let role = {
            let mut cache = self.cache.lock();
            let entry = cache.entry(key.to_string()).or_default();

            if let Some(value) = &entry.value {
                if value.is_fresh() {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    if let Some(m) = &self.metrics {
                        m.oracle().cache_hits_total.inc();
                    }
                    return value.clone();
                }
            }

            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            if let Some(m) = &self.metrics {
                m.oracle().cache_misses_total.inc();
            }

            match &entry.inflight {
                Some(inflight) => MissRole::Waiter(Arc::clone(inflight)),
                None => {
                    let inflight = Arc::new(Inflight::default());
                    entry.inflight = Some(Arc::clone(&inflight));
                    MissRole::Leader(inflight)
                }
            }
            // Cache lock dropped here; it is never held across a fetch.
        };

        match role {
            MissRole::Leader(inflight) => self.lead_fetch(key, &inflight),
            MissRole::Waiter(inflight) => self.wait_for_leader(key, &inflight),
        }
    }

    /// Upper bound on how long a full source walk may take
    fn fetch_budget(&self) -> Duration {
        self.sources
            .iter()
            .map(|s| s.timeout())
            .sum::<Duration>()
            + self.config.wait_slack
    }

    fn lead_fetch(&self, key: &str, inflight: &Arc<Inflight>) -> SourcedValue {
        let outcome = match self.try_sources(key) {
            Some(value) => value,
            None => {
                warn!(key, "All sources failed; serving fallback value");
                self.stats.fallback_served.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.oracle().fallback_served_total.inc();
                }
                self.fallback_value()
            }
        };

        {
            let mut cache = self.cache.lock();
            let entry = cache.entry(key.to_string()).or_default();
            entry.inflight = None;
            // A fallback answer is never cached: any stale real value stays
            // in place (still not fresh), and the next call goes straight
            // back to the sources.
            if outcome.source != FALLBACK_SOURCE {
                entry.value = Some(outcome.clone());
            }
        }

        let mut slot = inflight.slot.lock();
        *slot = Some(outcome.clone());
        inflight.cv.notify_all();

        outcome
    }

    fn wait_for_leader(&self, key: &str, inflight: &Arc<Inflight>) -> SourcedValue {
        self.stats.coalesced_waits.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.oracle().coalesced_waits_total.inc();
        }

        let deadline = Instant::now() + self.fetch_budget();
        let mut slot = inflight.slot.lock();
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            inflight.cv.wait_for(&mut slot, deadline - now);
        }

        match slot.clone() {
            Some(value) => value,
            None => {
                // Leader overran its budget (or died); degrade rather than block
                warn!(key, "In-flight fetch exceeded wait budget; serving fallback");
                self.stats.fallback_served.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.oracle().fallback_served_total.inc();
                }
                self.fallback_value()
            }
        }
    }

    /// Walk the sources in priority order; first plausible answer wins
    fn try_sources(&self, key: &str) -> Option<SourcedValue> {
        for source in &self.sources {
            if let Some(m) = &self.metrics {
                m.oracle()
                    .fetch_attempts_total
                    .with_label_values(&[source.name()])
                    .inc();
            }

            let result = fetch_with_timeout(source, key).and_then(|value| {
                if value.is_finite() && value > 0.0 && value <= self.config.max_plausible {
                    Ok(value)
                } else {
                    Err(SourceError::Implausible { value })
                }
            });

            match result {
                Ok(value) => {
                    debug!(
                        key,
                        source = source.name(),
                        value,
                        confidence = source.confidence().as_str(),
                        "Source answered"
                    );
                    if let Some(m) = &self.metrics {
                        m.oracle()
                            .last_price_gwei
                            .with_label_values(&[key])
                            .set(value);
                    }
                    return Some(SourcedValue {
                        value,
                        source: source.name().to_string(),
                        confidence: source.confidence(),
                        fetched_at: Instant::now(),
                        ttl: self.config.ttl,
                    });
                }
                Err(e) => {
                    warn!(key, source = source.name(), error = %e, "Source failed");
                    if let Some(m) = &self.metrics {
                        m.oracle()
                            .fetch_failures_total
                            .with_label_values(&[source.name(), e.reason_label()])
                            .inc();
                    }
                }
            }
        }
        None
    }

    fn fallback_value(&self) -> SourcedValue {
        SourcedValue {
            value: self.config.fallback_value,
            source: FALLBACK_SOURCE.to_string(),
            confidence: Confidence::Low,
            fetched_at: Instant::now(),
            ttl: Duration::ZERO,
        }
    }
}

/// Run one fetch on a helper thread and wait at most `source.timeout()`.
///
/// A fetch that overruns keeps running detached until its own transport
/// timeout fires; its late result is dropped by the bounded channel.
fn fetch_with_timeout(
    source: &Arc<dyn GasPriceSource>,
    key: &str,
) -> Result<f64, SourceError> {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let worker = Arc::clone(source);
    let key = key.to_string();
    let name = format!("oracle-{}", source.name());

    let spawned = std::thread::Builder::new().name(name).spawn(move || {
        let _ = tx.send(worker.fetch(&key));
    });
    if spawned.is_err() {
        return Err(SourceError::Transport("failed to spawn fetch thread".into()));
    }

    match rx.recv_timeout(source.timeout()) {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout {
            after: source.timeout(),
        }),
    }
}
