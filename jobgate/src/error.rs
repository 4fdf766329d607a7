use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Errors surfaced by the admission controller, execution engine and
/// recovery routine.
#[derive(Debug, Error)]
pub enum JobError {
    /// The requested job type has no registry entry.
    #[error("unknown job type: {0}")]
    UnknownType(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The operation is not valid for the job's current status.
    #[error("cannot {action} job {id} in {status} state")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("cancellation handle already registered for job {0}")]
    AlreadyRegistered(JobId),

    /// A wait was aborted by its cancellation signal.
    #[error("operation was cancelled")]
    Cancelled,

    /// The unit of work failed; the message is recorded on the job.
    #[error("job execution failed: {0}")]
    ExecutionFailure(String),

    #[error("job store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// Text stored in a failed job's `message` field. Execution failures
    /// keep the handler's own message without the variant prefix.
    pub fn recorded_message(&self) -> String {
        match self {
            JobError::ExecutionFailure(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors raised while loading configuration or building the registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("job type {0} is configured more than once")]
    DuplicateType(String),

    #[error("job type {name} asks for {requested} slots; at most {max} are supported")]
    ConcurrencyTooLarge {
        name: String,
        requested: usize,
        max: usize,
    },

    #[error("job type name must not be empty")]
    EmptyTypeName,

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}
