// Benchmarks for the two hottest paths in the request lifecycle: output
// comparison and routing decisions (spec.md §4.1, §4.5). Grounded on the
// teacher's `benches/performance_profile.rs` convention (criterion,
// `harness = false`, one group per hot path).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vesper::{omap, Comparator, ConfidenceTracker, ExecutionRouter, RoutingConfig, Value};

fn bench_comparator_equal_maps(c: &mut Criterion) {
    let comparator = Comparator::default();
    let oracle = omap! {
        "a" => 1i64,
        "b" => 2.0,
        "c" => "hello",
        "d" => Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
    };
    let candidate = oracle.clone();

    c.bench_function("comparator_equal_maps", |b| {
        b.iter(|| black_box(comparator.compare(black_box(&oracle), black_box(&candidate))))
    });
}

fn bench_comparator_divergent_maps(c: &mut Criterion) {
    let comparator = Comparator::default();
    let oracle = omap! { "items" => Value::List((0..50i64).map(Value::Int).collect()) };
    let candidate = omap! { "items" => Value::List((0..50i64).map(|i| Value::Int(i + 1)).collect()) };

    c.bench_function("comparator_divergent_maps", |b| {
        b.iter(|| black_box(comparator.compare(black_box(&oracle), black_box(&candidate))))
    });
}

fn bench_router_canary_decision(c: &mut Criterion) {
    let tracker = ConfidenceTracker::new();
    for i in 0..1000 {
        tracker.record_execution("bench_node", i % 50 == 0, false, false);
    }
    let router = ExecutionRouter::new(tracker, RoutingConfig::default());
    let inputs = omap! { "x" => 42i64 };

    c.bench_function("router_canary_decision", |b| {
        b.iter(|| black_box(router.route(black_box("bench_node"), black_box(&inputs), None)))
    });
}

criterion_group!(
    benches,
    bench_comparator_equal_maps,
    bench_comparator_divergent_maps,
    bench_router_canary_decision
);
criterion_main!(benches);
