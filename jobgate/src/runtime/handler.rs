use async_trait::async_trait;

use crate::job::JobRecord;
use crate::registry::JobTypeConfig;

/// Performs the unit of work for an admitted job.
///
/// The engine races `run` against the job's cancellation signal, so an
/// implementation only needs to reach an `.await` point for cancellation
/// to take effect. Errors and panics are recorded on the job as `Failed`.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn run(&self, job: &JobRecord, config: &JobTypeConfig) -> anyhow::Result<()>;
}

/// Stand-in work that waits for the job type's configured duration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedWork;

#[async_trait]
impl WorkHandler for SimulatedWork {
    async fn run(&self, job: &JobRecord, config: &JobTypeConfig) -> anyhow::Result<()> {
        tracing::trace!(
            job_id = %job.id,
            duration_ms = config.work_duration_ms,
            "simulating work"
        );
        tokio::time::sleep(config.work_duration()).await;
        Ok(())
    }
}
