//! Benchmarks for admission control and engine throughput using criterion.
//!
//! - Uncontended slot acquire/release
//! - Handle register/cancel churn
//! - Contended acquire across many tasks
//! - Full inline job lifecycle against the in-memory store

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jobgate::admission::AdmissionController;
use jobgate::cancel::MergedSignal;
use jobgate::job::JobId;
use jobgate_testkit::{engine, registry, InMemoryJobStore, RecordingHandler};
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

/// Benchmark: acquire and immediately release one slot.
fn bench_acquire_release(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("acquire_release");
    group.sample_size(100);

    group.bench_function("uncontended", |b| {
        let admission = AdmissionController::new(&registry(&[("bench", 4, 0)]));
        let signal = MergedSignal::default();

        b.to_async(&rt).iter(|| async {
            let permit = admission
                .acquire("bench", &signal)
                .await
                .expect("acquire should succeed");
            permit.release();
        });
    });

    group.finish();
}

/// Benchmark: register a handle and cancel it.
fn bench_handle_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_churn");
    group.sample_size(100);

    group.bench_function("register_cancel", |b| {
        let admission = AdmissionController::new(&registry(&[("bench", 1, 0)]));

        b.iter(|| {
            let job_id = JobId::new();
            admission
                .register_cancellation_handle(job_id)
                .expect("register should succeed");
            assert!(admission.request_cancellation(job_id));
        });
    });

    group.finish();
}

/// Benchmark: many tasks competing for a small pool.
fn bench_contended_acquire(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("contended_acquire");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    for tasks in [8usize, 64] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            let admission = Arc::new(AdmissionController::new(&registry(&[("bench", 2, 0)])));

            b.to_async(&rt).iter(|| {
                let admission = Arc::clone(&admission);
                async move {
                    let workers: Vec<_> = (0..tasks)
                        .map(|_| {
                            let admission = Arc::clone(&admission);
                            tokio::spawn(async move {
                                let signal = MergedSignal::default();
                                let _permit = admission
                                    .acquire("bench", &signal)
                                    .await
                                    .expect("acquire should succeed");
                                tokio::task::yield_now().await;
                            })
                        })
                        .collect();
                    for worker in workers {
                        worker.await.expect("worker should not panic");
                    }
                }
            });
        });
    }

    group.finish();
}

/// Benchmark: create_and_run with zero work duration.
fn bench_inline_lifecycle(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("inline_lifecycle");
    group.sample_size(50);

    group.bench_function("in_memory", |b| {
        let store = InMemoryJobStore::new();
        let handler = RecordingHandler::new();
        let engine = engine(&store, &handler, registry(&[("bench", 4, 0)]), "bench");

        b.to_async(&rt).iter(|| async {
            engine
                .create_and_run("bench", None, None)
                .await
                .expect("job should run");
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_handle_churn,
    bench_contended_acquire,
    bench_inline_lifecycle
);
criterion_main!(benches);
