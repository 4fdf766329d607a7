use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::instance::ProcessInstanceId;
use crate::job::{JobId, JobRecord, JobStatus};

/// Durable record of every job's identity, type, payload and status.
///
/// All operations are atomic at the single-record level; nothing in this
/// crate needs multi-record transactions.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails if the identifier already exists.
    async fn insert(&self, job: &JobRecord) -> anyhow::Result<()>;

    async fn find_by_id(&self, id: JobId) -> anyhow::Result<Option<JobRecord>>;

    /// Overwrite an existing record. Fails if the record does not exist.
    async fn update(&self, job: &JobRecord) -> anyhow::Result<()>;

    /// `InProgress` jobs whose owner differs from `instance` (including
    /// jobs with no owner recorded).
    async fn list_in_progress_not_owned_by(
        &self,
        instance: &ProcessInstanceId,
    ) -> anyhow::Result<Vec<JobRecord>>;

    async fn count_pending(&self) -> anyhow::Result<usize>;

    /// Filtered page of jobs, newest first.
    async fn list(&self, query: &JobQuery) -> anyhow::Result<JobPage>;

    /// Job counts by status and by type.
    async fn summary(&self) -> anyhow::Result<JobSummary>;
}

/// Filter and page selection for [`JobStore::list`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    /// 1-based page number.
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl JobQuery {
    pub const DEFAULT_PAGE_SIZE: usize = 20;
    pub const MAX_PAGE_SIZE: usize = 100;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Page number, at least 1.
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size; values outside `1..=MAX_PAGE_SIZE` fall back to the
    /// default.
    pub fn page_size(&self) -> usize {
        match self.page_size {
            Some(size) if (1..=Self::MAX_PAGE_SIZE).contains(&size) => size,
            _ => Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Rows to skip; saturates for page numbers past the addressable range.
    pub fn offset(&self) -> usize {
        (self.page() - 1).saturating_mul(self.page_size())
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.status.map_or(true, |status| job.status == status)
            && self
                .job_type
                .as_deref()
                .map_or(true, |job_type| job.job_type == job_type)
    }
}

/// One page of [`JobStore::list`] results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobPage {
    /// Number of jobs matching the filter across all pages.
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub jobs: Vec<JobRecord>,
}

/// Aggregate job counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    pub by_type: BTreeMap<String, usize>,
}

impl JobSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn record(&mut self, job: &JobRecord) {
        self.total += 1;
        *self.by_status.entry(job.status).or_insert(0) += 1;
        *self.by_type.entry(job.job_type.clone()).or_insert(0) += 1;
    }
}
