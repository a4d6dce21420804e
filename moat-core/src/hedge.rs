//! Bounded retries for safety-critical actions
//!
//! When closing an exposed hedge fails, the right response is a handful of
//! fast retries and then a human, not an ever-growing backoff: every second
//! the position is unhedged costs money. The retrier runs the action up to
//! `max_attempts` times with short backoff waits, and on exhaustion emits an
//! [`Escalation`] through the alert manager instead of raising past the
//! caller. The engine keeps running; the position risk is now explicitly a
//! human responsibility.

use crate::alerts::{Alert, AlertCategory, AlertManager, AlertSeverity};
use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::monitoring::MetricsRegistry;
use crate::shutdown::ShutdownSwitch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{error, info, warn};

/// Failures surfaced by the execution engine
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order rejected: {reason}")]
    Rejected { reason: String },
    #[error("venue timeout")]
    Timeout,
    #[error("insufficient liquidity for {pair}")]
    InsufficientLiquidity { pair: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Retry policy for one class of critical action
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (never zero)
    pub max_attempts: u32,
    /// Backoff applied between attempts
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Three fast attempts with 1s/2s waits: the action is time-critical,
        // and past this point an alert channel is the correct escalation,
        // not more backoff.
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Record of an exhausted critical retry loop, tagged for manual
/// intervention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    /// Identity of the failed action, e.g. "close_hedge"
    pub action: String,
    /// Position / route / origin-transaction context for the operator
    pub context: BTreeMap<String, String>,
    pub last_error: String,
    pub attempts: u32,
    pub timestamp: SystemTime,
}

impl Escalation {
    fn to_alert(&self) -> Alert {
        let mut alert = Alert::new(
            AlertCategory::Hedge,
            "retries_exhausted",
            AlertSeverity::Critical,
            format!(
                "{} failed after {} attempts: {}",
                self.action, self.attempts, self.last_error
            ),
        )
        .with_detail("action", &self.action)
        .with_detail("attempts", self.attempts.to_string())
        .with_detail("last_error", &self.last_error);

        for (key, value) in &self.context {
            alert = alert.with_detail(key, value);
        }
        alert
    }
}

/// Bounded retry loop around critical actions
pub struct HedgeRetrier {
    policy: RetryPolicy,
    alerts: Arc<AlertManager>,
    shutdown: Option<ShutdownSwitch>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl HedgeRetrier {
    pub fn new(policy: RetryPolicy, alerts: Arc<AlertManager>) -> Self {
        Self {
            policy,
            alerts,
            shutdown: None,
            metrics: None,
        }
    }

    /// Observe a shutdown switch during the inter-attempt waits
    pub fn with_shutdown(mut self, shutdown: ShutdownSwitch) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Publish retry counters to a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `op` up to `max_attempts` times. The action must be idempotent or
    /// compensating: it may have partially applied when it reports failure.
    ///
    /// `context` travels into the escalation record verbatim (position,
    /// origin transaction, route) so the operator can act without digging.
    pub fn execute<T, F>(
        &self,
        action: &str,
        context: &[(&str, &str)],
        mut op: F,
    ) -> Result<T, Escalation>
    where
        F: FnMut(u32) -> Result<T, ExecutionError>,
    {
        let mut backoff = ExponentialBackoff::with_config(self.policy.backoff.clone());
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if let Some(m) = &self.metrics {
                m.hedge().attempts_total.inc();
            }

            match op(attempt) {
                Ok(result) => {
                    if attempt > 1 {
                        info!(action, attempt, "Critical action recovered");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!(action, attempt, max_attempts, error = %e, "Critical action failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                if let Some(m) = &self.metrics {
                    m.hedge().retries_total.inc();
                }
                let delay = backoff.next_delay();
                match &self.shutdown {
                    Some(switch) => {
                        switch.sleep(delay);
                    }
                    None => std::thread::sleep(delay),
                }
            }
        }

        let escalation = Escalation {
            action: action.to_string(),
            context: context
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            last_error,
            attempts: max_attempts,
            timestamp: SystemTime::now(),
        };

        error!(
            action,
            attempts = escalation.attempts,
            last_error = %escalation.last_error,
            "Critical action exhausted retries; escalating for manual intervention"
        );
        if let Some(m) = &self.metrics {
            m.hedge().escalations_total.inc();
        }
        if let Err(e) = self.alerts.send(escalation.to_alert()) {
            error!("Failed to emit escalation alert: {}", e);
        }

        Err(escalation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertManagerConfig;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig::aggressive(),
        }
    }

    fn retrier() -> HedgeRetrier {
        HedgeRetrier::new(
            fast_policy(),
            Arc::new(AlertManager::new(AlertManagerConfig::default())),
        )
    }

    #[test]
    fn test_first_attempt_success_skips_backoff() {
        let retrier = retrier();

        let start = Instant::now();
        let result = retrier.execute("close_hedge", &[], |_attempt| Ok::<_, ExecutionError>(42));

        assert_eq!(result.unwrap(), 42);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_recovers_on_third_attempt_after_two_waits() {
        let retrier = retrier();

        let mut failures = 0;
        let result = retrier.execute("close_hedge", &[], |attempt| {
            if attempt <= 2 {
                failures += 1;
                Err(ExecutionError::Timeout)
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_exhaustion_returns_one_escalation_with_final_error() {
        let alerts = Arc::new(AlertManager::new(AlertManagerConfig::default()));
        let retrier = HedgeRetrier::new(fast_policy(), Arc::clone(&alerts));

        let context = [
            ("position", "short 2.5 WETH"),
            ("origin_tx", "0xabc123"),
        ];
        let mut calls = 0;
        let result: Result<(), Escalation> = retrier.execute("close_hedge", &context, |attempt| {
            calls += 1;
            Err(ExecutionError::Rejected {
                reason: format!("attempt {}", attempt),
            })
        });

        assert_eq!(calls, 3, "terminates deterministically after max_attempts");

        let escalation = result.unwrap_err();
        assert_eq!(escalation.action, "close_hedge");
        assert_eq!(escalation.attempts, 3);
        assert!(escalation.last_error.contains("attempt 3"));
        assert_eq!(
            escalation.context.get("origin_tx"),
            Some(&"0xabc123".to_string())
        );

        // Exactly one critical alert reached the sink
        assert_eq!(manager_critical_count(&alerts), 1);
    }

    fn manager_critical_count(alerts: &AlertManager) -> u64 {
        *alerts
            .counts_by_severity()
            .get(&AlertSeverity::Critical)
            .unwrap_or(&0)
    }

    #[test]
    fn test_escalation_serializes() {
        let escalation = Escalation {
            action: "close_hedge".into(),
            context: BTreeMap::from([("route".to_string(), "a:b:c".to_string())]),
            last_error: "venue timeout".into(),
            attempts: 3,
            timestamp: SystemTime::now(),
        };

        let json = serde_json::to_string(&escalation).unwrap();
        assert!(json.contains("\"close_hedge\""));
        assert!(json.contains("\"venue timeout\""));
    }

    #[test]
    fn test_shutdown_shortens_waits() {
        let shutdown = ShutdownSwitch::new();
        shutdown.trigger("going down");

        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig::default(), // 1s/2s waits if uninterrupted
        };
        let retrier = HedgeRetrier::new(
            policy,
            Arc::new(AlertManager::new(AlertManagerConfig::default())),
        )
        .with_shutdown(shutdown);

        let start = Instant::now();
        let result: Result<(), Escalation> =
            retrier.execute("close_hedge", &[], |_attempt| Err(ExecutionError::Timeout));

        // Still runs all attempts (bounded loop), but the waits collapse
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
