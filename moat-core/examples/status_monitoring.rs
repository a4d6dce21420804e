//! Monitoring setup example
//!
//! Shows the complete wiring for a production deployment: metrics registry,
//! alert manager with console and file outputs, route tracker and oracle
//! publishing into the registry, and the status server configuration the
//! operator tooling (routectl, Prometheus) connects to.

use moat_core::alerts::{AlertManager, AlertManagerConfig, AlertOutput, AlertSeverity};
use moat_core::hedge::{ExecutionError, HedgeRetrier, RetryPolicy};
use moat_core::monitoring::{MetricsRegistry, StatusServer, StatusServerConfig};
use moat_core::oracle::{Confidence, GasOracle, OracleConfig, StaticGasSource};
use moat_core::routes::{RouteHealthTracker, RouteId, TrackerConfig};
use moat_core::Result;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    moat_core::logging::init_logger("info", false);

    // Metrics registry shared by every component
    let metrics = Arc::new(MetricsRegistry::new()?);

    // Alert manager: console for Error+, JSONL file for everything
    let alerts = Arc::new(AlertManager::new(AlertManagerConfig {
        outputs: vec![
            AlertOutput::Console {
                min_severity: AlertSeverity::Error,
            },
            AlertOutput::File {
                path: PathBuf::from("/tmp/moat_alerts.jsonl"),
                min_severity: AlertSeverity::Info,
            },
        ],
        ..Default::default()
    }));

    // Route tracker publishing state gauges
    let tracker = Arc::new(
        RouteHealthTracker::new(TrackerConfig::default()).with_metrics(Arc::clone(&metrics)),
    );

    // Oracle with a static tier so the example needs no network
    let oracle = GasOracle::new(
        OracleConfig::default(),
        vec![Arc::new(StaticGasSource::new(
            "example_floor",
            22.5,
            Confidence::Low,
        ))],
    )
    .with_metrics(Arc::clone(&metrics));

    // Simulate some traffic so the report has content
    let good = RouteId::new("arbitrum", "uniswap_v3", "WETH/USDC");
    let bad = RouteId::new("ethereum", "sushiswap", "WETH/DAI");
    for _ in 0..8 {
        tracker.record_success(&good);
    }
    for _ in 0..5 {
        tracker.record_failure(&bad);
    }

    let price = oracle.get("ethereum");
    println!(
        "gas price: {:.1} gwei from {} ({})",
        price.value,
        price.source,
        price.confidence.as_str()
    );

    // A hedge retry that exhausts and escalates into the alert outputs
    let retrier = HedgeRetrier::new(
        RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        },
        Arc::clone(&alerts),
    )
    .with_metrics(Arc::clone(&metrics));

    let outcome = retrier.execute(
        "close_hedge",
        &[("position", "short 1.2 WETH"), ("origin_tx", "0xexample")],
        |_attempt| -> std::result::Result<(), ExecutionError> {
            Err(ExecutionError::Rejected {
                reason: "venue maintenance".into(),
            })
        },
    );
    println!(
        "hedge outcome: escalated = {} (see /tmp/moat_alerts.jsonl)",
        outcome.is_err()
    );

    // Route report as the operator surface serves it
    println!(
        "route report:\n{}",
        serde_json::to_string_pretty(&tracker.report())?
    );

    // The status server runs on the engine's tokio runtime:
    //
    //   let server = StatusServer::new(config, metrics, tracker);
    //   tokio::spawn(server.serve());
    //
    // and then: routectl report / routectl reset chain:venue:pair
    let config = StatusServerConfig::default();
    let _server = StatusServer::new(config.clone(), Arc::clone(&metrics), Arc::clone(&tracker));
    println!(
        "status server configured for http://{} (/metrics, /health, /routes)",
        config.listen_addr
    );

    Ok(())
}
