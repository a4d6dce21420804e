//! Runtime configuration
//!
//! A serde tree loaded from JSON, one section per mechanism. Every field has
//! a default so an empty object is a valid config; `validate` rejects the
//! combinations that would make the state machines degenerate.

use crate::backoff::BackoffConfig;
use crate::hedge::RetryPolicy;
use crate::oracle::OracleConfig;
use crate::reconnect::ReconnectConfig;
use crate::routes::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoatConfig {
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub routes: RouteSettings,
    #[serde(default)]
    pub hedge: HedgeSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

impl MoatConfig {
    /// Load and validate a JSON config file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routes.degrade_after == 0 {
            return Err(ConfigError::Invalid(
                "routes.degrade_after must be at least 1".into(),
            ));
        }
        if self.routes.degrade_after >= self.routes.blacklist_after {
            return Err(ConfigError::Invalid(format!(
                "routes.degrade_after ({}) must be below routes.blacklist_after ({})",
                self.routes.degrade_after, self.routes.blacklist_after
            )));
        }
        if self.oracle.ttl_ms == 0 {
            return Err(ConfigError::Invalid("oracle.ttl_ms must be non-zero".into()));
        }
        if self.hedge.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "hedge.max_attempts must be at least 1".into(),
            ));
        }
        for section in [
            ("reconnect", self.reconnect.factor),
            ("hedge", self.hedge.factor),
        ] {
            if section.1 < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.factor must be at least 1.0",
                    section.0
                )));
            }
        }
        Ok(())
    }
}

/// Stream reconnection section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub jitter_factor: f64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter_factor: 0.0,
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl ReconnectSettings {
    pub fn to_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                factor: self.factor,
                jitter_factor: self.jitter_factor,
            },
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

/// Value oracle section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_fallback_gwei")]
    pub fallback_gwei: f64,
    #[serde(default = "default_max_plausible_gwei")]
    pub max_plausible_gwei: f64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            fallback_gwei: default_fallback_gwei(),
            max_plausible_gwei: default_max_plausible_gwei(),
        }
    }
}

impl OracleSettings {
    pub fn to_config(&self) -> OracleConfig {
        OracleConfig {
            ttl: Duration::from_millis(self.ttl_ms),
            fallback_value: self.fallback_gwei,
            max_plausible: self.max_plausible_gwei,
            ..Default::default()
        }
    }
}

/// Route health section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSettings {
    #[serde(default = "default_degrade_after")]
    pub degrade_after: u32,
    #[serde(default = "default_blacklist_after")]
    pub blacklist_after: u32,
    /// Optional cooldown in seconds after which a blacklisted route is
    /// automatically reset. Absent by default: recovery is an operator
    /// decision unless explicitly configured otherwise.
    #[serde(default)]
    pub auto_reset_after_secs: Option<u64>,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            degrade_after: default_degrade_after(),
            blacklist_after: default_blacklist_after(),
            auto_reset_after_secs: None,
        }
    }
}

impl RouteSettings {
    pub fn to_config(&self) -> TrackerConfig {
        TrackerConfig {
            degrade_after: self.degrade_after,
            blacklist_after: self.blacklist_after,
            auto_reset_after: self.auto_reset_after_secs.map(Duration::from_secs),
        }
    }
}

/// Critical-action retry section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl Default for HedgeSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl HedgeSettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                factor: self.factor,
                jitter_factor: 0.0,
            },
        }
    }
}

/// Monitoring section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Optional JSONL alert log path
    #[serde(default)]
    pub alert_log: Option<PathBuf>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            alert_log: None,
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_ttl_ms() -> u64 {
    12_000
}

fn default_fallback_gwei() -> f64 {
    30.0
}

fn default_max_plausible_gwei() -> f64 {
    10_000.0
}

fn default_degrade_after() -> u32 {
    2
}

fn default_blacklist_after() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9464".parse().expect("static addr")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_valid() {
        let config: MoatConfig = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();

        assert_eq!(config.routes.degrade_after, 2);
        assert_eq!(config.routes.blacklist_after, 5);
        assert_eq!(config.oracle.ttl_ms, 12_000);
        assert_eq!(config.hedge.max_attempts, 3);
    }

    #[test]
    fn test_partial_override() {
        let config: MoatConfig = serde_json::from_str(
            r#"{
                "routes": { "degrade_after": 3, "blacklist_after": 10 },
                "oracle": { "fallback_gwei": 45.5 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.routes.degrade_after, 3);
        assert_eq!(config.routes.blacklist_after, 10);
        assert_eq!(config.oracle.fallback_gwei, 45.5);
        // Untouched sections keep defaults
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let config: MoatConfig = serde_json::from_str(
            r#"{ "routes": { "degrade_after": 5, "blacklist_after": 5 } }"#,
        )
        .unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let config: MoatConfig =
            serde_json::from_str(r#"{ "oracle": { "ttl_ms": 0 } }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sub_unit_factor_rejected() {
        let config: MoatConfig =
            serde_json::from_str(r#"{ "hedge": { "factor": 0.5 } }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moat.json");
        std::fs::write(
            &path,
            r#"{ "monitoring": { "listen_addr": "0.0.0.0:9999" } }"#,
        )
        .unwrap();

        let config = MoatConfig::load_from_file(&path).unwrap();
        assert_eq!(config.monitoring.listen_addr.port(), 9999);
    }

    #[test]
    fn test_conversions() {
        let config = MoatConfig::default();

        let reconnect = config.reconnect.to_config();
        assert_eq!(reconnect.backoff.base_delay, Duration::from_secs(1));
        assert_eq!(reconnect.backoff.max_delay, Duration::from_secs(60));

        let tracker = config.routes.to_config();
        assert_eq!(tracker.auto_reset_after, None);

        let policy = config.hedge.to_policy();
        assert_eq!(policy.max_attempts, 3);
    }
}
