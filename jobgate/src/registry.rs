use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::ConfigError;

/// Policy for one job type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypeConfig {
    /// Type name, unique within a registry.
    pub name: String,
    /// Maximum number of jobs of this type executing at once.
    pub max_concurrency: usize,
    /// Duration of the unit of work, in milliseconds.
    #[serde(default)]
    pub work_duration_ms: u64,
}

impl JobTypeConfig {
    pub fn new(name: impl Into<String>, max_concurrency: usize, work_duration: Duration) -> Self {
        Self {
            name: name.into(),
            max_concurrency,
            work_duration_ms: u64::try_from(work_duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn work_duration(&self) -> Duration {
        Duration::from_millis(self.work_duration_ms)
    }
}

/// Mapping from job type name to its configuration.
///
/// Built once at startup; there is no way to mutate it afterwards.
#[derive(Clone, Debug, Default)]
pub struct JobTypeRegistry {
    types: HashMap<String, JobTypeConfig>,
}

impl JobTypeRegistry {
    /// Upper bound on `max_concurrency`, the largest slot pool a
    /// semaphore can hold.
    pub const MAX_CONCURRENCY: usize = Semaphore::MAX_PERMITS;

    pub fn new(configs: impl IntoIterator<Item = JobTypeConfig>) -> Result<Self, ConfigError> {
        let mut types = HashMap::new();
        for config in configs {
            if config.name.trim().is_empty() {
                return Err(ConfigError::EmptyTypeName);
            }
            if types.contains_key(&config.name) {
                return Err(ConfigError::DuplicateType(config.name));
            }
            if config.max_concurrency > Self::MAX_CONCURRENCY {
                return Err(ConfigError::ConcurrencyTooLarge {
                    name: config.name,
                    requested: config.max_concurrency,
                    max: Self::MAX_CONCURRENCY,
                });
            }
            types.insert(config.name.clone(), config);
        }
        Ok(Self { types })
    }

    pub fn lookup(&self, name: &str) -> Option<&JobTypeConfig> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn all_type_names(&self) -> BTreeSet<String> {
        self.types.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobTypeConfig> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
