use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cancel::{CancellationHandle, MergedSignal};
use crate::error::JobError;
use crate::job::JobId;
use crate::registry::JobTypeRegistry;
use crate::telemetry;

/// A held execution slot for one job type.
///
/// The slot goes back to its pool when the permit is dropped, so every
/// exit path of the holder releases it exactly once.
#[derive(Debug)]
pub struct SlotPermit {
    /// The job type this slot was acquired for.
    pub job_type: String,
    /// Timestamp when the slot was acquired.
    pub acquired_at: DateTime<Utc>,
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    /// Return the slot now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        tracing::trace!(job_type = %self.job_type, "slot released");
    }
}

/// Point-in-time slot usage for one job type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub job_type: String,
    pub max_concurrency: usize,
    pub available: usize,
    pub in_use: usize,
}

#[derive(Debug)]
struct SlotPool {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
}

/// Per-type admission control plus the registry of cancellation handles
/// for jobs currently being processed.
///
/// One instance per process, shared by reference between the engine and
/// whatever issues cancellations.
pub struct AdmissionController {
    pools: HashMap<String, SlotPool>,
    handles: Mutex<HashMap<JobId, CancellationHandle>>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("AdmissionController");
        debug.field("pools", &self.pools);

        match self.handles.try_lock() {
            Some(handles) => {
                debug.field("registered_jobs", &handles.len());
            }
            None => {
                debug.field("registered_jobs", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl AdmissionController {
    /// Create one slot pool per registered type, each starting full.
    pub fn new(registry: &JobTypeRegistry) -> Self {
        let pools = registry
            .iter()
            .map(|config| {
                (
                    config.name.clone(),
                    SlotPool {
                        max_concurrency: config.max_concurrency,
                        semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
                    },
                )
            })
            .collect();

        Self {
            pools,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn pool(&self, job_type: &str) -> Result<&SlotPool, JobError> {
        self.pools
            .get(job_type)
            .ok_or_else(|| JobError::UnknownType(job_type.to_string()))
    }

    /// Wait for a free slot of `job_type`, or until `signal` fires.
    ///
    /// Waiters on the same type are admitted in arrival order.
    pub async fn acquire(
        &self,
        job_type: &str,
        signal: &MergedSignal,
    ) -> Result<SlotPermit, JobError> {
        let pool = self.pool(job_type)?;
        if signal.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let semaphore = Arc::clone(&pool.semaphore);
        let permit = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(JobError::Cancelled),
            permit = semaphore.acquire_owned() => permit,
        };
        // Pools are never closed.
        let permit = permit.map_err(|_| JobError::Cancelled)?;

        let available = pool.semaphore.available_permits();
        telemetry::set_available_slots(job_type, available);
        tracing::debug!(job_type, available, "slot acquired");

        Ok(SlotPermit {
            job_type: job_type.to_string(),
            acquired_at: Utc::now(),
            _permit: permit,
        })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self, job_type: &str) -> Result<Option<SlotPermit>, JobError> {
        let pool = self.pool(job_type)?;
        match Arc::clone(&pool.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(SlotPermit {
                job_type: job_type.to_string(),
                acquired_at: Utc::now(),
                _permit: permit,
            })),
            Err(_) => Ok(None),
        }
    }

    /// Store a fresh, unsignalled handle for `job_id`.
    pub fn register_cancellation_handle(
        &self,
        job_id: JobId,
    ) -> Result<CancellationHandle, JobError> {
        let mut handles = self.handles.lock();
        if handles.contains_key(&job_id) {
            return Err(JobError::AlreadyRegistered(job_id));
        }
        let handle = CancellationHandle::new();
        handles.insert(job_id, handle.clone());
        Ok(handle)
    }

    /// Remove and signal the handle for `job_id`.
    ///
    /// Returns whether a handle was registered. Concurrent calls with
    /// [`unregister`](Self::unregister) resolve on the single map removal:
    /// whichever removes the entry wins, the other sees nothing.
    pub fn request_cancellation(&self, job_id: JobId) -> bool {
        let removed = self.handles.lock().remove(&job_id);
        match removed {
            Some(handle) => {
                handle.cancel();
                tracing::debug!(%job_id, "cancellation signalled");
                true
            }
            None => false,
        }
    }

    /// Drop the handle for `job_id` without signalling it.
    pub fn unregister(&self, job_id: JobId) {
        self.handles.lock().remove(&job_id);
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.handles.lock().contains_key(&job_id)
    }

    pub fn registered_jobs(&self) -> usize {
        self.handles.lock().len()
    }

    /// Free slots for `job_type`; `None` for unknown types.
    ///
    /// Eventually consistent with concurrent acquire/release; fine for
    /// monitoring, not for admission decisions.
    pub fn available_slots(&self, job_type: &str) -> Option<usize> {
        self.pools
            .get(job_type)
            .map(|pool| pool.semaphore.available_permits())
    }

    pub fn max_concurrency(&self, job_type: &str) -> Option<usize> {
        self.pools.get(job_type).map(|pool| pool.max_concurrency)
    }

    pub fn configured_types(&self) -> BTreeSet<String> {
        self.pools.keys().cloned().collect()
    }

    /// Slot usage for every type, sorted by type name.
    pub fn snapshot(&self) -> Vec<SlotUsage> {
        let mut usage: Vec<SlotUsage> = self
            .pools
            .iter()
            .map(|(job_type, pool)| {
                let available = pool.semaphore.available_permits();
                SlotUsage {
                    job_type: job_type.clone(),
                    max_concurrency: pool.max_concurrency,
                    available,
                    in_use: pool.max_concurrency.saturating_sub(available),
                }
            })
            .collect();
        usage.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        usage
    }
}
