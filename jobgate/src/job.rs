use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::JobError;
use crate::instance::ProcessInstanceId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a job.
///
/// `Pending -> InProgress -> {Completed, Failed, Cancelled}`, plus the
/// direct `Pending -> Cancelled` (cancelled before admission) and
/// `Pending -> Failed` (execution broke down before admission) edges.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job can still be cancelled.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("invalid job status: {}", s))
    }
}

/// Persisted state of a single job.
///
/// Fields are public for stores and snapshots; status changes should go
/// through the `mark_*` methods, which keep the timestamps and owner in
/// step with the status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub payload: Option<String>,
    pub status: JobStatus,
    pub process_instance_id: Option<ProcessInstanceId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl JobRecord {
    /// A fresh job in `Pending` with a new identifier.
    pub fn pending(job_type: impl Into<String>, payload: Option<String>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            process_instance_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_in_progress(&mut self, owner: ProcessInstanceId) -> Result<(), JobError> {
        self.transition(JobStatus::InProgress, "start")?;
        self.started_at = Some(Utc::now());
        self.process_instance_id = Some(owner);
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Completed, "complete")?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Failed, "fail")?;
        self.completed_at = Some(Utc::now());
        self.message = Some(message.into());
        Ok(())
    }

    pub fn mark_cancelled(&mut self, message: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Cancelled, "cancel")?;
        self.completed_at = Some(Utc::now());
        self.message = Some(message.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus, action: &'static str) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidState {
                id: self.id,
                status: self.status,
                action,
            });
        }
        self.status = next;
        Ok(())
    }
}
