//! Benchmarks for graph loading, routing and retry decisions.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use voxflow::conversation::{conversation_graph, ConversationOptions};
use voxflow::core::StepError;
use voxflow::retry::{should_retry, RetryPolicy};
use voxflow::workflow::{Condition, WorkflowGraph};

fn retry_benchmark(c: &mut Criterion) {
    let policy = RetryPolicy::new().with_max_attempts(5);
    let error = StepError::transient("upstream unavailable");
    c.bench_function("should_retry", |b| {
        b.iter(|| should_retry(black_box(&policy), black_box(3), black_box(&error)));
    });
}

fn routing_benchmark(c: &mut Criterion) {
    let condition = Condition::and(vec![
        Condition::string_equals("/classification/intent", "music"),
        Condition::numeric_at_least("/classification/confidence", 0.4),
    ]);
    let payload = json!({"classification": {"intent": "music", "confidence": 0.92}});
    c.bench_function("condition_evaluate", |b| {
        b.iter(|| condition.evaluate(black_box(&payload)));
    });
}

fn graph_benchmark(c: &mut Criterion) {
    let Ok(graph) = conversation_graph(&ConversationOptions::default()) else {
        return;
    };
    let Ok(document) = graph.to_json() else {
        return;
    };
    c.bench_function("graph_from_json", |b| {
        b.iter(|| WorkflowGraph::from_json(black_box(&document)));
    });
}

criterion_group!(benches, retry_benchmark, routing_benchmark, graph_benchmark);
criterion_main!(benches);
