//! Alerting - the escalation channel
//!
//! Severity-graded alerts with console and JSONL file sinks, per-alert rate
//! limiting (Critical bypasses it), and active-alert tracking. This is where
//! the retrier's escalations, route blacklistings, and stream outages become
//! visible to a human.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Informational (no action required)
    Info = 0,
    /// Should be investigated
    Warning = 1,
    /// Requires attention
    Error = 2,
    /// Requires immediate human action
    Critical = 3,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Which dependency the alert concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertCategory {
    /// Event stream connectivity
    Stream,
    /// Value sources and cache
    Oracle,
    /// Route health transitions
    Route,
    /// Hedge execution and escalations
    Hedge,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "STREAM",
            Self::Oracle => "ORACLE",
            Self::Route => "ROUTE",
            Self::Hedge => "HEDGE",
        }
    }
}

/// Alert identifier for deduplication and rate limiting
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId {
    pub category: AlertCategory,
    pub name: String,
}

impl AlertId {
    pub fn new(category: AlertCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.category.as_str(), self.name)
    }
}

/// An alert with free-form detail fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: HashMap<String, String>,
    pub timestamp: SystemTime,
}

impl Alert {
    pub fn new(
        category: AlertCategory,
        name: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: AlertId::new(category, name),
            severity,
            message: message.into(),
            details: HashMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Human-readable single-alert rendering
    pub fn format(&self) -> String {
        let mut output = format!(
            "[{}] {} - {}",
            self.severity.as_str(),
            self.id.label(),
            self.message
        );

        if !self.details.is_empty() {
            let mut keys: Vec<&String> = self.details.keys().collect();
            keys.sort();
            for key in keys {
                output.push_str(&format!("\n    {}: {}", key, self.details[key]));
            }
        }

        output
    }

    /// JSON rendering for the file sink and webhook-style consumers
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize alert to JSON")
    }
}

/// Output channel configuration
#[derive(Debug, Clone)]
pub enum AlertOutput {
    /// Emit through the tracing subscriber
    Console { min_severity: AlertSeverity },
    /// Append JSONL records to a file
    File {
        path: PathBuf,
        min_severity: AlertSeverity,
    },
}

/// Per-alert occurrence tracking
#[derive(Debug, Clone)]
struct AlertState {
    last_seen: SystemTime,
    count: u64,
    last_sent: Option<SystemTime>,
}

impl AlertState {
    fn new() -> Self {
        Self {
            last_seen: SystemTime::now(),
            count: 1,
            last_sent: None,
        }
    }

    fn touch(&mut self) {
        self.last_seen = SystemTime::now();
        self.count += 1;
    }
}

/// Alert manager configuration
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    pub outputs: Vec<AlertOutput>,
    /// Minimum seconds between sending the same alert id
    pub rate_limit_secs: u64,
    /// Drop inactive alert state after this many seconds
    pub auto_resolve_secs: u64,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            outputs: vec![AlertOutput::Console {
                min_severity: AlertSeverity::Warning,
            }],
            rate_limit_secs: 60,
            auto_resolve_secs: 300,
        }
    }
}

/// Central alert sink
pub struct AlertManager {
    config: AlertManagerConfig,
    active_alerts: RwLock<HashMap<AlertId, AlertState>>,
    alert_counts: RwLock<HashMap<AlertSeverity, u64>>,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig) -> Self {
        info!(outputs = config.outputs.len(), "AlertManager initialized");
        Self {
            config,
            active_alerts: RwLock::new(HashMap::new()),
            alert_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Send an alert through all configured outputs
    pub fn send(&self, alert: Alert) -> Result<()> {
        if !self.should_send(&alert) {
            debug!(alert = %alert.id.label(), "Alert rate limited");
            return Ok(());
        }

        self.track(&alert);

        {
            let mut counts = self.alert_counts.write();
            *counts.entry(alert.severity).or_insert(0) += 1;
        }

        for output in &self.config.outputs {
            if let Err(e) = self.send_to_output(&alert, output) {
                error!("Failed to send alert to output: {}", e);
            }
        }

        Ok(())
    }

    /// Rate limiting; Critical alerts always pass
    fn should_send(&self, alert: &Alert) -> bool {
        if alert.severity == AlertSeverity::Critical {
            return true;
        }

        let active = self.active_alerts.read();
        if let Some(state) = active.get(&alert.id) {
            if let Some(last_sent) = state.last_sent {
                if let Ok(elapsed) = last_sent.elapsed() {
                    if elapsed < Duration::from_secs(self.config.rate_limit_secs) {
                        return false;
                    }
                }
            }
        }

        true
    }

    fn track(&self, alert: &Alert) {
        let mut active = self.active_alerts.write();
        active
            .entry(alert.id.clone())
            .and_modify(|state| {
                state.touch();
                state.last_sent = Some(SystemTime::now());
            })
            .or_insert_with(|| {
                let mut state = AlertState::new();
                state.last_sent = Some(SystemTime::now());
                state
            });
    }

    fn send_to_output(&self, alert: &Alert, output: &AlertOutput) -> Result<()> {
        match output {
            AlertOutput::Console { min_severity } => {
                if alert.severity >= *min_severity {
                    self.send_to_console(alert);
                }
                Ok(())
            }
            AlertOutput::File { path, min_severity } => {
                if alert.severity >= *min_severity {
                    self.send_to_file(alert, path)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn send_to_console(&self, alert: &Alert) {
        let formatted = alert.format();
        match alert.severity {
            AlertSeverity::Info => info!("{}", formatted),
            AlertSeverity::Warning => warn!("{}", formatted),
            AlertSeverity::Error | AlertSeverity::Critical => error!("{}", formatted),
        }
    }

    fn send_to_file(&self, alert: &Alert, path: &PathBuf) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open alert log file")?;

        let json = alert.to_json()?;
        writeln!(file, "{}", json).context("Failed to write alert to file")?;
        file.flush().context("Failed to flush alert log file")?;

        Ok(())
    }

    /// Mark an alert as no longer active
    pub fn resolve(&self, alert_id: &AlertId) {
        let mut active = self.active_alerts.write();
        if active.remove(alert_id).is_some() {
            info!(alert = %alert_id.label(), "Alert resolved");
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_alerts.read().len()
    }

    pub fn counts_by_severity(&self) -> HashMap<AlertSeverity, u64> {
        self.alert_counts.read().clone()
    }

    /// Drop alert state not seen within the auto-resolve window
    pub fn cleanup_old_alerts(&self) {
        let now = SystemTime::now();
        let window = Duration::from_secs(self.config.auto_resolve_secs);

        let mut active = self.active_alerts.write();
        active.retain(|id, state| {
            if let Ok(elapsed) = now.duration_since(state.last_seen) {
                if elapsed > window {
                    info!(alert = %id.label(), "Auto-resolving inactive alert");
                    return false;
                }
            }
            true
        });
    }
}
