use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::instance::ProcessInstanceId;
use crate::job::{JobId, JobRecord, JobStatus};
use crate::store::{JobPage, JobQuery, JobStore, JobSummary};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobgate_jobs (
        id UUID PRIMARY KEY,
        job_type TEXT NOT NULL,
        payload TEXT,
        status TEXT NOT NULL,
        process_instance_id TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobgate_jobs_status_idx ON jobgate_jobs (status)",
    "CREATE INDEX IF NOT EXISTS jobgate_jobs_job_type_idx ON jobgate_jobs (job_type)",
    "CREATE INDEX IF NOT EXISTS jobgate_jobs_owner_idx ON jobgate_jobs (process_instance_id)",
    "CREATE INDEX IF NOT EXISTS jobgate_jobs_created_at_idx ON jobgate_jobs (created_at DESC)",
];

/// PostgreSQL-backed job store.
///
/// Every operation is a single statement, so per-record atomicity comes
/// from the database.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using the persistence settings.
    pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.connection_string)
            .await?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the jobs table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        debug!("jobgate schema ensured");
        Ok(())
    }

    fn row_to_job(row: &PgRow) -> anyhow::Result<JobRecord> {
        let status: String = row.try_get("status")?;
        let owner: Option<String> = row.try_get("process_instance_id")?;
        Ok(JobRecord {
            id: JobId(row.try_get::<Uuid, _>("id")?),
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            process_instance_id: owner.map(ProcessInstanceId::from),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            message: row.try_get("message")?,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: &JobRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobgate_jobs (
                id, job_type, payload, status, process_instance_id,
                created_at, started_at, completed_at, message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.0)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.process_instance_id.as_ref().map(|id| id.as_str()))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobgate_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update(&self, job: &JobRecord) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE jobgate_jobs
            SET status = $2,
                process_instance_id = $3,
                started_at = $4,
                completed_at = $5,
                message = $6
            WHERE id = $1
            "#,
        )
        .bind(job.id.0)
        .bind(job.status.as_str())
        .bind(job.process_instance_id.as_ref().map(|id| id.as_str()))
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.message)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            anyhow::bail!("job {} not found", job.id);
        }
        Ok(())
    }

    async fn list_in_progress_not_owned_by(
        &self,
        instance: &ProcessInstanceId,
    ) -> anyhow::Result<Vec<JobRecord>> {
        // IS DISTINCT FROM keeps rows with no owner recorded.
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM jobgate_jobs
            WHERE status = $1
              AND process_instance_id IS DISTINCT FROM $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(JobStatus::InProgress.as_str())
        .bind(instance.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count_pending(&self) -> anyhow::Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*)::bigint AS count FROM jobgate_jobs WHERE status = $1",
        )
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }

    async fn list(&self, query: &JobQuery) -> anyhow::Result<JobPage> {
        let status = query.status.map(|status| status.as_str());
        let job_type = query.job_type.as_deref();

        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::bigint AS count
            FROM jobgate_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR job_type = $2)
            "#,
        )
        .bind(status)
        .bind(job_type)
        .fetch_one(&self.pool)
        .await?;
        let total_count: i64 = row.try_get("count")?;

        let rows = sqlx::query(
            r#"
            SELECT *
            FROM jobgate_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR job_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status)
        .bind(job_type)
        .bind(i64::try_from(query.page_size()).unwrap_or(i64::MAX))
        .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(JobPage {
            total_count: total_count as usize,
            page: query.page(),
            page_size: query.page_size(),
            jobs: rows.iter().map(Self::row_to_job).collect::<anyhow::Result<_>>()?,
        })
    }

    async fn summary(&self) -> anyhow::Result<JobSummary> {
        let rows = sqlx::query(
            r#"
            SELECT status, job_type, COUNT(*)::bigint AS count
            FROM jobgate_jobs
            GROUP BY status, job_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = JobSummary {
            total: 0,
            by_status: BTreeMap::new(),
            by_type: BTreeMap::new(),
        };
        for row in rows {
            let status: JobStatus = row.try_get::<String, _>("status")?.parse()?;
            let job_type: String = row.try_get("job_type")?;
            let count = row.try_get::<i64, _>("count")? as usize;

            summary.total += count;
            *summary.by_status.entry(status).or_insert(0) += count;
            *summary.by_type.entry(job_type).or_insert(0) += count;
        }
        Ok(summary)
    }
}
