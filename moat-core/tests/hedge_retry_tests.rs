//! Critical-action retry and escalation behavior

use moat_core::alerts::{AlertManager, AlertManagerConfig, AlertOutput, AlertSeverity};
use moat_core::backoff::BackoffConfig;
use moat_core::hedge::{Escalation, ExecutionError, HedgeRetrier, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter_factor: 0.0,
        },
    }
}

#[test]
fn succeeds_on_third_attempt_after_two_backoff_waits() {
    let alerts = Arc::new(AlertManager::new(AlertManagerConfig::default()));
    let retrier = HedgeRetrier::new(policy(), alerts);

    let start = Instant::now();
    let result = retrier.execute("close_hedge", &[], |attempt| {
        if attempt < 3 {
            Err(ExecutionError::Timeout)
        } else {
            Ok("filled")
        }
    });

    assert_eq!(result.unwrap(), "filled");
    // Two waits of 10ms and 20ms sit between the three attempts
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn exhaustion_emits_exactly_one_escalation_with_the_final_error() {
    let alerts = Arc::new(AlertManager::new(AlertManagerConfig::default()));
    let retrier = HedgeRetrier::new(policy(), Arc::clone(&alerts));

    let context = [
        ("position", "short 2.5 WETH"),
        ("origin_tx", "0xdeadbeef"),
        ("route", "arbitrum:uniswap_v3:WETH/USDC"),
    ];
    let result: Result<(), Escalation> = retrier.execute("close_hedge", &context, |attempt| {
        Err(ExecutionError::Rejected {
            reason: format!("venue refused attempt {}", attempt),
        })
    });

    let escalation = result.unwrap_err();
    assert_eq!(escalation.action, "close_hedge");
    assert_eq!(escalation.attempts, 3);
    assert!(escalation.last_error.contains("attempt 3"));
    assert_eq!(
        escalation.context.get("position"),
        Some(&"short 2.5 WETH".to_string())
    );

    let critical = alerts
        .counts_by_severity()
        .get(&AlertSeverity::Critical)
        .copied()
        .unwrap_or(0);
    assert_eq!(critical, 1, "exactly one escalation per exhausted loop");
}

#[test]
fn escalation_lands_in_the_alert_file_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("alerts.jsonl");

    let alerts = Arc::new(AlertManager::new(AlertManagerConfig {
        outputs: vec![AlertOutput::File {
            path: log_path.clone(),
            min_severity: AlertSeverity::Critical,
        }],
        ..Default::default()
    }));
    let retrier = HedgeRetrier::new(policy(), alerts);

    let _ = retrier.execute::<(), _>("close_hedge", &[("origin_tx", "0xabc")], |_attempt| {
        Err(ExecutionError::Timeout)
    });

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(contents.lines().count(), 1);

    let record: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(record["severity"], "Critical");
    assert_eq!(record["details"]["origin_tx"], "0xabc");
    assert_eq!(record["details"]["action"], "close_hedge");
}

#[test]
fn loop_is_bounded_even_under_permanent_failure() {
    let alerts = Arc::new(AlertManager::new(AlertManagerConfig::default()));
    let retrier = HedgeRetrier::new(
        RetryPolicy {
            max_attempts: 5,
            backoff: BackoffConfig::aggressive(),
        },
        alerts,
    );

    let mut calls = 0;
    let result: Result<(), Escalation> = retrier.execute("close_hedge", &[], |_attempt| {
        calls += 1;
        Err(ExecutionError::Transport("gone".into()))
    });

    assert!(result.is_err());
    assert_eq!(calls, 5);
}

#[test]
fn escalation_record_roundtrips_through_json() {
    let alerts = Arc::new(AlertManager::new(AlertManagerConfig::default()));
    let retrier = HedgeRetrier::new(policy(), alerts);

    let result: Result<(), Escalation> =
        retrier.execute("close_hedge", &[("origin_tx", "0x1")], |_attempt| {
            Err(ExecutionError::InsufficientLiquidity {
                pair: "WETH/USDC".into(),
            })
        });

    let escalation = result.unwrap_err();
    let json = serde_json::to_string(&escalation).unwrap();
    let parsed: Escalation = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.action, escalation.action);
    assert_eq!(parsed.attempts, escalation.attempts);
    assert!(parsed.last_error.contains("WETH/USDC"));
}
