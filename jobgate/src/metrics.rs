//! Prometheus metrics instrumentation for jobgate.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `jobgate_jobs_created_total` - Jobs persisted in `pending`
//! - `jobgate_jobs_finished_total` - Jobs reaching a terminal status
//! - `jobgate_jobs_recovered_total` - Orphaned jobs failed at startup
//!
//! ## Gauges
//! - `jobgate_available_slots` - Free admission slots per job type
//!
//! ## Histograms
//! - `jobgate_job_duration_seconds` - Time from admission to terminal status
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for jobgate metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `job_type`.
pub static JOBS_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("jobgate_jobs_created_total", "Total number of jobs created");
    CounterVec::new(opts, &["job_type"])
        .expect("jobgate_jobs_created_total metric creation failed")
});

/// Labels: `job_type`, `status` (completed, failed, cancelled).
pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "jobgate_jobs_finished_total",
        "Total number of jobs that reached a terminal status",
    );
    CounterVec::new(opts, &["job_type", "status"])
        .expect("jobgate_jobs_finished_total metric creation failed")
});

/// Labels: `job_type`.
pub static JOBS_RECOVERED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "jobgate_jobs_recovered_total",
        "Total number of orphaned jobs failed during startup recovery",
    );
    CounterVec::new(opts, &["job_type"])
        .expect("jobgate_jobs_recovered_total metric creation failed")
});

/// Labels: `job_type`.
pub static AVAILABLE_SLOTS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "jobgate_available_slots",
        "Free admission slots per job type",
    );
    GaugeVec::new(opts, &["job_type"]).expect("jobgate_available_slots metric creation failed")
});

/// Labels: `job_type`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "jobgate_job_duration_seconds",
        "Time from admission to terminal status in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["job_type", "status"])
        .expect("jobgate_job_duration_seconds metric creation failed")
});

/// Register all collectors with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_CREATED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(JOBS_RECOVERED_TOTAL.clone()),
        Box::new(AVAILABLE_SLOTS.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_created(job_type: &str) {
    JOBS_CREATED_TOTAL.with_label_values(&[job_type]).inc();
}

pub fn record_job_finished(job_type: &str, status: &str) {
    JOBS_FINISHED_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}

pub fn record_job_recovered(job_type: &str) {
    JOBS_RECOVERED_TOTAL.with_label_values(&[job_type]).inc();
}

pub fn set_available_slots(job_type: &str, available: f64) {
    AVAILABLE_SLOTS.with_label_values(&[job_type]).set(available);
}

pub fn observe_job_duration(job_type: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[job_type, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
