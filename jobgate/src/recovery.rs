use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::JobError;
use crate::instance::ProcessIdentity;
use crate::job::JobId;
use crate::store::JobStore;
use crate::telemetry;

/// Result of a startup recovery scan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Jobs moved from `InProgress` to `Failed`.
    pub recovered: Vec<JobId>,
    /// `Pending` jobs left as they were.
    pub pending_untouched: usize,
}

fn orphaned_message(previous_owner: Option<&str>) -> String {
    format!(
        "process instance terminated unexpectedly (previous owner: {})",
        previous_owner.unwrap_or("unknown")
    )
}

/// Fail every `InProgress` job owned by another process instance.
///
/// Must run before this process starts executing jobs: it assumes nothing
/// else mutates `InProgress` records while it scans. `Pending` jobs are
/// not resumed.
pub async fn recover_orphaned_jobs<S>(
    store: &S,
    identity: &dyn ProcessIdentity,
) -> Result<RecoveryReport, JobError>
where
    S: JobStore + ?Sized,
{
    let span = telemetry::recovery_span(identity.current_instance_id().as_str());
    scan_and_fail(store, identity).instrument(span).await
}

async fn scan_and_fail<S>(
    store: &S,
    identity: &dyn ProcessIdentity,
) -> Result<RecoveryReport, JobError>
where
    S: JobStore + ?Sized,
{
    let current = identity.current_instance_id();
    let orphaned = store.list_in_progress_not_owned_by(current).await?;
    let mut report = RecoveryReport::default();

    for mut job in orphaned {
        let previous_owner = job
            .process_instance_id
            .as_ref()
            .map(|owner| owner.as_str().to_string());
        job.mark_failed(orphaned_message(previous_owner.as_deref()))?;
        store.update(&job).await?;

        telemetry::record_job_recovered(
            job.id.to_string(),
            &job.job_type,
            previous_owner.as_deref().unwrap_or("unknown"),
        );
        report.recovered.push(job.id);
    }

    report.pending_untouched = store.count_pending().await?;
    if report.pending_untouched > 0 {
        tracing::info!(
            pending = report.pending_untouched,
            "pending jobs left for an operator to resume"
        );
    }
    tracing::info!(recovered = report.recovered.len(), "recovery complete");

    Ok(report)
}
