use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Identifier stamped on jobs owned by a running process.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProcessInstanceId(String);

impl ProcessInstanceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProcessInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessInstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProcessInstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Source of the current process instance identity.
///
/// The value must stay constant for the lifetime of the process.
pub trait ProcessIdentity: Send + Sync {
    fn current_instance_id(&self) -> &ProcessInstanceId;
}

/// Identity generated once at process start.
#[derive(Clone, Debug)]
pub struct ProcessInstance {
    id: ProcessInstanceId,
    pid: u32,
    host: Option<String>,
    started_at: DateTime<Utc>,
}

/// Snapshot of the running instance for status reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInstanceInfo {
    pub instance_id: ProcessInstanceId,
    pub pid: u32,
    pub host: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ProcessInstance {
    pub fn new() -> Self {
        Self::with_id(ProcessInstanceId::generate())
    }

    /// Use a fixed identifier, e.g. one supplied by the deployment.
    pub fn with_id(id: ProcessInstanceId) -> Self {
        Self {
            id,
            pid: std::process::id(),
            host: std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
            started_at: Utc::now(),
        }
    }

    pub fn info(&self) -> ProcessInstanceInfo {
        ProcessInstanceInfo {
            instance_id: self.id.clone(),
            pid: self.pid,
            host: self.host.clone(),
            started_at: self.started_at,
        }
    }
}

impl Default for ProcessInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessIdentity for ProcessInstance {
    fn current_instance_id(&self) -> &ProcessInstanceId {
        &self.id
    }
}
