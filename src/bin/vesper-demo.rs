// Thin demonstration binary: wires an oracle and a slightly buggy candidate
// together behind the orchestrator and walks through the routing bands.

use std::sync::Arc;
use vesper::{init_tracing, ConfidenceTracker, FnHandler, Orchestrator, OrderedMap, Runtime, Value};

fn oracle_runtime() -> Runtime {
    let runtime = Runtime::new("oracle");
    runtime.register_handler(
        "double_v1",
        Arc::new(FnHandler(|inputs: &OrderedMap| {
            let x = inputs.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(vesper::omap! { "result" => x * 2.0 })
        })),
    );
    runtime
}

fn candidate_runtime() -> Runtime {
    let runtime = Runtime::new("candidate");
    runtime.register_handler(
        "double_v1",
        Arc::new(FnHandler(|inputs: &OrderedMap| {
            let x = inputs.get("x").and_then(Value::as_f64).unwrap_or(0.0);
            // Drifts by a tiny epsilon-safe amount, except near x=13 where it
            // diverges on purpose so the demo has something to report.
            let result = if (x as i64) == 13 { x * 2.0 + 1.0 } else { x * 2.0 };
            Ok(vesper::omap! { "result" => result })
        })),
    );
    runtime
}

#[tokio::main]
async fn main() {
    init_tracing();

    let confidence_tracker = ConfidenceTracker::new();
    let orchestrator = Orchestrator::new(oracle_runtime(), confidence_tracker.clone())
        .with_candidate(candidate_runtime());

    for x in 0..30 {
        let dual = orchestrator
            .execute_dual("double_v1", &vesper::omap! { "x" => x as f64 })
            .await;
        if dual.diverged {
            println!("x={x}: DIVERGED, oracle result={:?}", dual.result.output);
        }
    }

    println!(
        "confidence after 30 dual-verify runs: {:.4}",
        confidence_tracker.confidence("double_v1")
    );
    println!(
        "recommended mode: {:?}",
        confidence_tracker.recommended_mode("double_v1")
    );
}
