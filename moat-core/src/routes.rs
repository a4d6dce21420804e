//! Route health tracking
//!
//! A route is a (chain, venue, pair) triple against which operations are
//! attempted. The tracker observes success/failure outcomes reported by the
//! workers and demotes routes through `Healthy -> Degraded -> Blacklisted`
//! as consecutive failures accumulate. A blacklisted route is excluded from
//! selection until an explicit reset: a single success is a flap, not proof
//! of recovery, so blacklisting only heals through the operator surface or
//! the (optional, off by default) cooldown timer.

use crate::monitoring::MetricsRegistry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Identifier of one tradeable route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteId {
    pub chain: String,
    pub venue: String,
    pub pair: String,
}

impl RouteId {
    pub fn new(
        chain: impl Into<String>,
        venue: impl Into<String>,
        pair: impl Into<String>,
    ) -> Self {
        Self {
            chain: chain.into(),
            venue: venue.into(),
            pair: pair.into(),
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.venue, self.pair)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid route id {input:?}, expected chain:venue:pair")]
pub struct ParseRouteIdError {
    pub input: String,
}

impl FromStr for RouteId {
    type Err = ParseRouteIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [chain, venue, pair] if !chain.is_empty() && !venue.is_empty() && !pair.is_empty() => {
                Ok(RouteId::new(*chain, *venue, *pair))
            }
            _ => Err(ParseRouteIdError {
                input: s.to_string(),
            }),
        }
    }
}

/// Health state of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteState {
    /// Normal operation
    Healthy,
    /// Failing repeatedly; still selectable but suspect
    Degraded,
    /// Excluded from selection until reset
    Blacklisted,
}

impl RouteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Blacklisted => "blacklisted",
        }
    }

    /// Numeric encoding for the state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Blacklisted => 2,
        }
    }
}

/// Tracker thresholds and recovery policy
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Consecutive failures at which a healthy route becomes degraded
    pub degrade_after: u32,
    /// Consecutive failures at which a route is blacklisted
    pub blacklist_after: u32,
    /// When set, a blacklisted route whose last failure is older than this
    /// is reset on its next usability check. Off by default: an operator
    /// reset should be the normal recovery path, not a timer that quietly
    /// re-enables a persistently bad route.
    pub auto_reset_after: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            degrade_after: 2,
            blacklist_after: 5,
            auto_reset_after: None,
        }
    }
}

/// Automatic state transition: a pure function of the previous state, the
/// failure streak, and the thresholds. Blacklisting is sticky; only
/// `reset` moves a route back to healthy.
fn state_for(previous: RouteState, consecutive_failures: u32, config: &TrackerConfig) -> RouteState {
    if previous == RouteState::Blacklisted || consecutive_failures >= config.blacklist_after {
        RouteState::Blacklisted
    } else if consecutive_failures >= config.degrade_after {
        RouteState::Degraded
    } else {
        previous
    }
}

/// Per-route record. Created lazily on first use, never deleted, only reset.
#[derive(Debug, Clone)]
struct RouteRecord {
    state: RouteState,
    consecutive_failures: u32,
    total_attempts: u64,
    total_successes: u64,
    last_failure_at: Option<SystemTime>,
    last_success_at: Option<SystemTime>,
    // Monotonic twin of last_failure_at for the cooldown check
    last_failure_instant: Option<Instant>,
}

impl RouteRecord {
    fn new() -> Self {
        Self {
            state: RouteState::Healthy,
            consecutive_failures: 0,
            total_attempts: 0,
            total_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            last_failure_instant: None,
        }
    }
}

/// Reported view of one route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHealth {
    pub route: String,
    pub state: RouteState,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_successes: u64,
    /// `total_successes / total_attempts`, 0.0 before any attempt
    pub win_rate: f64,
    pub last_failure_unix: Option<u64>,
    pub last_success_unix: Option<u64>,
}

/// Snapshot of the whole registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteReport {
    pub generated_unix: u64,
    pub routes: Vec<RouteHealth>,
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Concurrent registry of route health records.
///
/// Counter updates are atomic per route: each operation holds the map entry
/// for the duration of the update, so workers hammering the same route from
/// multiple threads never interleave half-applied updates.
pub struct RouteHealthTracker {
    config: TrackerConfig,
    routes: DashMap<RouteId, RouteRecord>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RouteHealthTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            routes: DashMap::new(),
            metrics: None,
        }
    }

    /// Publish route state and counters to a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether the caller should attempt operations on this route.
    ///
    /// Unknown routes are usable (records are created lazily). Degraded
    /// routes remain usable; only a blacklist excludes a route. When a
    /// cooldown is configured, a blacklisted route past it is reset here.
    pub fn is_usable(&self, route: &RouteId) -> bool {
        let Some(mut record) = self.routes.get_mut(route) else {
            return true;
        };

        if record.state != RouteState::Blacklisted {
            return true;
        }

        if let (Some(cooldown), Some(last_failure)) =
            (self.config.auto_reset_after, record.last_failure_instant)
        {
            if last_failure.elapsed() >= cooldown {
                info!(route = %route, cooldown_secs = cooldown.as_secs(), "Cooldown elapsed; resetting blacklisted route");
                Self::apply_reset(&mut record);
                self.publish_state(route, record.state);
                return true;
            }
        }

        false
    }

    /// Record a successful operation. Zeroes the failure streak; does not
    /// change the state (a blacklist never heals from one success, and a
    /// degraded route stays suspect until an operator says otherwise).
    pub fn record_success(&self, route: &RouteId) {
        let mut record = self
            .routes
            .entry(route.clone())
            .or_insert_with(RouteRecord::new);

        record.total_attempts += 1;
        record.total_successes += 1;
        record.consecutive_failures = 0;
        record.last_success_at = Some(SystemTime::now());

        debug!(route = %route, state = record.state.as_str(), "Route success");
        if let Some(m) = &self.metrics {
            m.routes()
                .successes_total
                .with_label_values(&[&route.to_string()])
                .inc();
        }
    }

    /// Record a failed operation and recompute the state from the streak.
    pub fn record_failure(&self, route: &RouteId) {
        let mut record = self
            .routes
            .entry(route.clone())
            .or_insert_with(RouteRecord::new);

        record.total_attempts += 1;
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure_at = Some(SystemTime::now());
        record.last_failure_instant = Some(Instant::now());

        let previous = record.state;
        record.state = state_for(previous, record.consecutive_failures, &self.config);

        if record.state != previous {
            warn!(
                route = %route,
                from = previous.as_str(),
                to = record.state.as_str(),
                consecutive_failures = record.consecutive_failures,
                "Route state downgraded"
            );
        } else {
            debug!(
                route = %route,
                consecutive_failures = record.consecutive_failures,
                "Route failure"
            );
        }

        let state = record.state;
        drop(record);
        if let Some(m) = &self.metrics {
            m.routes()
                .failures_total
                .with_label_values(&[&route.to_string()])
                .inc();
        }
        self.publish_state(route, state);
    }

    /// Force a route back to healthy. Returns false for an unknown route -
    /// a no-op, not an error.
    pub fn reset(&self, route: &RouteId) -> bool {
        let Some(mut record) = self.routes.get_mut(route) else {
            return false;
        };

        info!(route = %route, from = record.state.as_str(), "Route reset to healthy");
        Self::apply_reset(&mut record);
        let state = record.state;
        drop(record);

        if let Some(m) = &self.metrics {
            m.routes().resets_total.inc();
        }
        self.publish_state(route, state);
        true
    }

    /// Reset every tracked route; returns how many were reset
    pub fn reset_all(&self) -> usize {
        let ids: Vec<RouteId> = self.routes.iter().map(|r| r.key().clone()).collect();
        let mut count = 0;
        for id in ids {
            if self.reset(&id) {
                count += 1;
            }
        }
        count
    }

    fn apply_reset(record: &mut RouteRecord) {
        record.state = RouteState::Healthy;
        record.consecutive_failures = 0;
    }

    fn publish_state(&self, route: &RouteId, state: RouteState) {
        if let Some(m) = &self.metrics {
            m.routes()
                .route_state
                .with_label_values(&[&route.to_string()])
                .set(state.as_gauge());
        }
    }

    /// Current state of a route, if it has ever been seen
    pub fn state_of(&self, route: &RouteId) -> Option<RouteState> {
        self.routes.get(route).map(|r| r.state)
    }

    /// Number of tracked routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Snapshot of every route, sorted by id for stable output
    pub fn report(&self) -> RouteReport {
        let mut routes: Vec<RouteHealth> = self
            .routes
            .iter()
            .map(|entry| {
                let record = entry.value();
                let win_rate = if record.total_attempts > 0 {
                    record.total_successes as f64 / record.total_attempts as f64
                } else {
                    0.0
                };
                RouteHealth {
                    route: entry.key().to_string(),
                    state: record.state,
                    consecutive_failures: record.consecutive_failures,
                    total_attempts: record.total_attempts,
                    total_successes: record.total_successes,
                    win_rate,
                    last_failure_unix: record.last_failure_at.map(unix_seconds),
                    last_success_unix: record.last_success_at.map(unix_seconds),
                }
            })
            .collect();
        routes.sort_by(|a, b| a.route.cmp(&b.route));

        RouteReport {
            generated_unix: unix_seconds(SystemTime::now()),
            routes,
        }
    }
}
