//! Fan-out benchmarks for the event hub.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use printlink_core::{Event, EventHub};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Benchmark publish with a growing number of listeners on one topic.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let payload = json!({"nozzleTemp": 210.5, "bedTemp": 60.0, "printProgress": 42});

    for listeners in [1usize, 10, 100] {
        let hub = EventHub::new();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..listeners {
            let counter = Arc::clone(&counter);
            hub.subscribe("device:c1:telemetry", move |_: &Event| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        group.throughput(Throughput::Elements(listeners as u64));
        group.bench_with_input(BenchmarkId::from_parameter(listeners), &listeners, |b, _| {
            b.iter(|| hub.publish(black_box("device:c1:telemetry"), payload.clone()))
        });
    }

    group.finish();
}

/// Benchmark subscribe/unsubscribe churn.
fn bench_churn(c: &mut Criterion) {
    let hub = EventHub::new();
    c.bench_function("subscribe_unsubscribe", |b| {
        b.iter(|| {
            let sub = hub.subscribe("device:c1:status", |_: &Event| {});
            hub.unsubscribe(black_box(&sub));
        })
    });
}

criterion_group!(benches, bench_fanout, bench_churn);
criterion_main!(benches);
