// Route tracker benchmarks
//
// record_success/record_failure run on every operation a worker performs,
// and is_usable gates route selection; both sit on the trading hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use moat_core::routes::{RouteHealthTracker, RouteId, TrackerConfig};
use std::time::Duration;

fn tracked_routes(n: usize) -> Vec<RouteId> {
    (0..n)
        .map(|i| RouteId::new("arbitrum", format!("venue{}", i), "WETH/USDC"))
        .collect()
}

fn bench_record_outcomes(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_tracker");
    group.measurement_time(Duration::from_secs(2));

    group.bench_function("record_success_existing_route", |b| {
        let tracker = RouteHealthTracker::new(TrackerConfig::default());
        let route = RouteId::new("arbitrum", "uniswap_v3", "WETH/USDC");
        tracker.record_success(&route);
        b.iter(|| tracker.record_success(black_box(&route)))
    });

    group.bench_function("record_failure_existing_route", |b| {
        let tracker = RouteHealthTracker::new(TrackerConfig::default());
        let route = RouteId::new("arbitrum", "uniswap_v3", "WETH/USDC");
        b.iter(|| {
            tracker.record_failure(black_box(&route));
            // Keep the streak from wandering into blacklist territory
            tracker.record_success(black_box(&route));
        })
    });

    group.bench_function("is_usable_healthy", |b| {
        let tracker = RouteHealthTracker::new(TrackerConfig::default());
        let route = RouteId::new("arbitrum", "uniswap_v3", "WETH/USDC");
        tracker.record_success(&route);
        b.iter(|| black_box(tracker.is_usable(black_box(&route))))
    });

    group.bench_function("is_usable_blacklisted", |b| {
        let tracker = RouteHealthTracker::new(TrackerConfig::default());
        let route = RouteId::new("arbitrum", "uniswap_v3", "WETH/USDC");
        for _ in 0..5 {
            tracker.record_failure(&route);
        }
        b.iter(|| black_box(tracker.is_usable(black_box(&route))))
    });

    group.finish();
}

fn bench_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_tracker_report");
    group.measurement_time(Duration::from_secs(2));

    for size in [10usize, 100, 1000] {
        let tracker = RouteHealthTracker::new(TrackerConfig::default());
        for route in tracked_routes(size) {
            tracker.record_success(&route);
        }

        group.bench_function(format!("report_{}_routes", size), |b| {
            b.iter(|| black_box(tracker.report()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_outcomes, bench_report);
criterion_main!(benches);
