use jobgate::*;
use std::sync::Arc;
use std::time::Duration;

use crate::handler::RecordingHandler;
use crate::store::InMemoryJobStore;

pub type TestEngine = ExecutionEngine<InMemoryJobStore, RecordingHandler>;

/// Registry from `(name, max_concurrency, work_duration_ms)` triples.
pub fn registry(types: &[(&str, usize, u64)]) -> JobTypeRegistry {
    JobTypeRegistry::new(types.iter().map(|(name, max, ms)| {
        JobTypeConfig::new(*name, *max, Duration::from_millis(*ms))
    }))
    .expect("test registry should be valid")
}

/// One type, `"slow"`, limited to a single slot with 100ms of work.
pub fn slow_registry() -> JobTypeRegistry {
    registry(&[("slow", 1, 100)])
}

/// Engine over the given collaborators, owned by `instance_id`.
pub fn engine(
    store: &InMemoryJobStore,
    handler: &RecordingHandler,
    registry: JobTypeRegistry,
    instance_id: &str,
) -> Arc<TestEngine> {
    let engine = EngineBuilder::new()
        .with_store(Arc::new(store.clone()))
        .with_handler(Arc::new(handler.clone()))
        .with_registry(registry)
        .with_identity(Arc::new(ProcessInstance::with_id(instance_id.into())))
        .with_config(EngineConfig::default().with_shutdown_timeout_ms(1_000))
        .build()
        .expect("engine should build");
    Arc::new(engine)
}

/// A job already `InProgress` and owned by `owner`, as a crashed process
/// would have left it.
pub fn in_progress_job(job_type: &str, owner: &str) -> JobRecord {
    let mut job = JobRecord::pending(job_type, None);
    job.mark_in_progress(owner.into())
        .expect("pending job can start");
    job
}

/// Poll `store` until `id` reaches `status`.
///
/// Panics after `limit` so a broken engine fails the test instead of
/// hanging it.
pub async fn wait_for_status(
    store: &InMemoryJobStore,
    id: JobId,
    status: JobStatus,
    limit: Duration,
) -> JobRecord {
    let polled = tokio::time::timeout(limit, async {
        loop {
            if let Some(job) = store.snapshot(id) {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    match polled {
        Ok(job) => job,
        Err(_) => panic!(
            "job {} did not reach {} within {:?}; last seen {:?}",
            id,
            status,
            limit,
            store.snapshot(id).map(|job| job.status)
        ),
    }
}
