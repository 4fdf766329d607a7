//! Tracing and telemetry instrumentation for jobgate.
//!
//! Span constructors and recording helpers used along the job lifecycle.
//! Every helper logs through `tracing`; with the `metrics` feature enabled
//! it also updates the Prometheus collectors in [`crate::metrics`].
//!
//! # Example
//!
//! ```ignore
//! use jobgate::telemetry::{job_execute_span, record_job_created};
//!
//! record_job_created(job_id, "email");
//! let span = job_execute_span(job_id, "email");
//! let _enter = span.enter();
//! ```

use tracing::{info_span, Span};

/// Create a tracing span for one job's execution path.
#[must_use]
pub fn job_execute_span(job_id: impl AsRef<str>, job_type: impl AsRef<str>) -> Span {
    info_span!(
        "jobgate.execute",
        job_id = %job_id.as_ref(),
        job_type = %job_type.as_ref(),
    )
}

/// Create a tracing span for waiting on an admission slot.
#[must_use]
pub fn admission_span(job_id: impl AsRef<str>, job_type: impl AsRef<str>) -> Span {
    info_span!(
        "jobgate.admission",
        job_id = %job_id.as_ref(),
        job_type = %job_type.as_ref(),
    )
}

/// Create a tracing span for the startup recovery scan.
#[must_use]
pub fn recovery_span(instance_id: impl AsRef<str>) -> Span {
    info_span!("jobgate.recovery", instance_id = %instance_id.as_ref())
}

/// Record that a job was persisted in `Pending`.
pub fn record_job_created(job_id: impl AsRef<str>, job_type: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        job_type = %job_type.as_ref(),
        "job created"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_created(job_type.as_ref());
}

/// Record that a job reached a terminal status.
pub fn record_job_finished(
    job_id: impl AsRef<str>,
    job_type: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        job_type = %job_type.as_ref(),
        status = %status.as_ref(),
        "job finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_finished(job_type.as_ref(), status.as_ref());
}

/// Record an orphaned job being failed by recovery.
pub fn record_job_recovered(
    job_id: impl AsRef<str>,
    job_type: impl AsRef<str>,
    previous_owner: impl AsRef<str>,
) {
    tracing::warn!(
        job_id = %job_id.as_ref(),
        job_type = %job_type.as_ref(),
        previous_owner = %previous_owner.as_ref(),
        "orphaned job marked failed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_recovered(job_type.as_ref());
}

/// Update the free-slot gauge for a job type.
pub fn set_available_slots(job_type: impl AsRef<str>, available: usize) {
    tracing::trace!(
        job_type = %job_type.as_ref(),
        available,
        "available slots updated"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::set_available_slots(job_type.as_ref(), available as f64);
}

/// Observe how long a job held its slot.
pub fn observe_job_duration(
    job_type: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::debug!(
        job_type = %job_type.as_ref(),
        status = %status.as_ref(),
        duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(
        job_type.as_ref(),
        status.as_ref(),
        duration_secs,
    );
}

/// Start timing a job's execution.
pub fn record_job_start(job_id: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Finish timing started by [`record_job_start`].
pub fn record_job_end(handle: JobTimingHandle, job_type: impl AsRef<str>, status: impl AsRef<str>) {
    observe_job_duration(job_type, status, handle.start.elapsed().as_secs_f64());
}

/// Handle for tracking job execution duration.
///
/// Returned by [`record_job_start`] and consumed by [`record_job_end`].
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
