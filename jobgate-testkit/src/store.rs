use async_trait::async_trait;
use jobgate::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-memory [`JobStore`] with failure injection and a log of every write.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
    writes: Arc<Mutex<Vec<(JobId, JobStatus)>>>,
    fail_updates_to: Arc<Mutex<Option<JobStatus>>>,
    yield_on_access: Arc<AtomicBool>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record in place directly, bypassing the write log.
    pub fn seed(&self, job: JobRecord) -> JobId {
        let id = job.id;
        self.jobs.lock().insert(id, job);
        id
    }

    pub fn snapshot(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.lock().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<JobRecord> {
        self.jobs.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Statuses written for `id`, in order, starting with the insert.
    pub fn status_history(&self, id: JobId) -> Vec<JobStatus> {
        self.writes
            .lock()
            .iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Make every update that writes `status` fail until cleared with
    /// `None`.
    pub fn fail_updates_to(&self, status: Option<JobStatus>) {
        *self.fail_updates_to.lock() = status;
    }

    /// Yield to the scheduler at the start of every store operation, the
    /// way a networked store would, so concurrent callers interleave.
    pub fn yield_on_access(&self, enabled: bool) {
        self.yield_on_access.store(enabled, Ordering::SeqCst);
    }

    async fn pause(&self) {
        if self.yield_on_access.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.pause().await;
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            anyhow::bail!("job {} already exists", job.id);
        }
        jobs.insert(job.id, job.clone());
        self.writes.lock().push((job.id, job.status));
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        self.pause().await;
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn update(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.pause().await;
        if *self.fail_updates_to.lock() == Some(job.status) {
            anyhow::bail!("injected failure writing {} for job {}", job.status, job.id);
        }

        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&job.id) {
            Some(existing) => *existing = job.clone(),
            None => anyhow::bail!("job {} not found", job.id),
        }
        self.writes.lock().push((job.id, job.status));
        Ok(())
    }

    async fn list_in_progress_not_owned_by(
        &self,
        instance: &ProcessInstanceId,
    ) -> anyhow::Result<Vec<JobRecord>> {
        self.pause().await;
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| {
                job.status == JobStatus::InProgress
                    && job.process_instance_id.as_ref() != Some(instance)
            })
            .cloned()
            .collect())
    }

    async fn count_pending(&self) -> anyhow::Result<usize> {
        self.pause().await;
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .count())
    }

    async fn list(&self, query: &JobQuery) -> anyhow::Result<JobPage> {
        self.pause().await;
        let mut matching: Vec<JobRecord> = self
            .jobs
            .lock()
            .values()
            .filter(|job| query.matches(job))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));

        let total_count = matching.len();
        let jobs = matching
            .into_iter()
            .skip(query.offset())
            .take(query.page_size())
            .collect();

        Ok(JobPage {
            total_count,
            page: query.page(),
            page_size: query.page_size(),
            jobs,
        })
    }

    async fn summary(&self) -> anyhow::Result<JobSummary> {
        self.pause().await;
        let mut summary = JobSummary::default();
        for job in self.jobs.lock().values() {
            summary.record(job);
        }
        Ok(summary)
    }
}
