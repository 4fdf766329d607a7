use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::admission::{AdmissionController, SlotUsage};
use crate::cancel::{CancellationHandle, MergedSignal};
use crate::config::EngineConfig;
use crate::error::JobError;
use crate::instance::{ProcessIdentity, ProcessInstanceId};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::recovery::{recover_orphaned_jobs, RecoveryReport};
use crate::registry::JobTypeRegistry;
use crate::store::{JobPage, JobQuery, JobStore, JobSummary};
use crate::telemetry;

use super::handler::WorkHandler;

/// Message recorded when a job is cancelled before it got a slot.
pub const CANCELLED_WAITING_MESSAGE: &str = "cancelled while waiting for a slot";
/// Message recorded when a job is cancelled during its unit of work.
pub const CANCELLED_RUNNING_MESSAGE: &str = "job was cancelled";
/// Message recorded when `cancel` finds a pending job nobody is driving.
pub const CANCELLED_BEFORE_EXECUTION_MESSAGE: &str = "cancelled before execution";

/// What [`ExecutionEngine::cancel`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// A live execution was signalled; it records its own terminal status.
    Signalled,
    /// The job was pending with no execution attached and is now cancelled.
    CancelledBeforeExecution,
    /// The job finished between the status check and the cancel request.
    NoOp,
}

/// Drives jobs through `Pending -> InProgress -> terminal` under per-type
/// admission control.
///
/// One engine per process. Recovery should run (see
/// [`recover`](Self::recover)) before the first job is created.
pub struct ExecutionEngine<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    executor: Executor<S, H>,
    config: EngineConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, H> fmt::Debug for ExecutionEngine<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("instance_id", self.executor.identity.current_instance_id())
            .field("job_types", &self.executor.registry.len())
            .field("admission", &self.executor.admission)
            .field("shutdown_cancelled", &self.executor.shutdown.is_cancelled())
            .finish()
    }
}

impl<S, H> ExecutionEngine<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    /// Create an engine from its collaborators. Prefer
    /// [`EngineBuilder`](super::EngineBuilder).
    pub fn new(
        config: EngineConfig,
        store: Arc<S>,
        handler: Arc<H>,
        registry: Arc<JobTypeRegistry>,
        identity: Arc<dyn ProcessIdentity>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(&registry));
        Self {
            executor: Executor {
                store,
                handler,
                registry,
                admission,
                identity,
                shutdown: CancellationHandle::new(),
            },
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.executor.store)
    }

    pub fn registry(&self) -> &JobTypeRegistry {
        &self.executor.registry
    }

    pub fn admission(&self) -> Arc<AdmissionController> {
        Arc::clone(&self.executor.admission)
    }

    pub fn instance_id(&self) -> &ProcessInstanceId {
        self.executor.identity.current_instance_id()
    }

    /// Fail jobs left `InProgress` by other process instances.
    pub async fn recover(&self) -> Result<RecoveryReport, JobError> {
        recover_orphaned_jobs(
            self.executor.store.as_ref(),
            self.executor.identity.as_ref(),
        )
        .await
    }

    /// Persist a new job and execute it in the background.
    ///
    /// Returns the `Pending` snapshot as soon as it is stored. Whatever
    /// happens afterwards is recorded on the job, never returned here.
    pub async fn create(
        &self,
        job_type: &str,
        payload: Option<String>,
    ) -> Result<JobRecord, JobError> {
        let (job, registration) = self.executor.persist_new(job_type, payload).await?;
        let snapshot = job.clone();

        let executor = self.executor.clone();
        let span = telemetry::job_execute_span(job.id.to_string(), &job.job_type);
        let job_id = job.id;
        let task = tokio::spawn(
            async move {
                if let Err(err) = executor.execute(job, registration, None).await {
                    tracing::error!(%job_id, error = %err, "background job execution failed");
                }
            }
            .instrument(span),
        );
        self.track(task);

        Ok(snapshot)
    }

    /// Persist a new job and drive it to a terminal status inline.
    ///
    /// `caller` is merged into the job's cancellation signal. Store
    /// failures during status transitions are returned.
    pub async fn create_and_run(
        &self,
        job_type: &str,
        payload: Option<String>,
        caller: Option<&CancellationHandle>,
    ) -> Result<JobRecord, JobError> {
        let (job, registration) = self.executor.persist_new(job_type, payload).await?;
        let span = telemetry::job_execute_span(job.id.to_string(), &job.job_type);
        self.executor
            .execute(job, registration, caller.cloned())
            .instrument(span)
            .await
    }

    /// Drive an existing `Pending` job, e.g. one left over from a previous
    /// process that an operator chose to resume.
    pub async fn run_pending(
        &self,
        job_id: JobId,
        caller: Option<&CancellationHandle>,
    ) -> Result<JobRecord, JobError> {
        // Registered first so a concurrent `cancel` signals this execution
        // instead of writing `Cancelled` underneath it. A `cancel` already
        // closing the record holds the registration and this fails with
        // `AlreadyRegistered`.
        let registration = JobRegistration::register(&self.executor.admission, job_id)?;

        let job = self
            .executor
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(JobError::InvalidState {
                id: job_id,
                status: job.status,
                action: "run",
            });
        }
        if !self.executor.registry.contains(&job.job_type) {
            return Err(JobError::UnknownType(job.job_type));
        }

        let span = telemetry::job_execute_span(job.id.to_string(), &job.job_type);
        self.executor
            .execute(job, registration, caller.cloned())
            .instrument(span)
            .await
    }

    /// Request cancellation of a pending or running job.
    ///
    /// Does not wait for a signalled execution to record its outcome.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, JobError> {
        let job = self.get(job_id).await?;
        if !job.status.is_active() {
            return Err(JobError::InvalidState {
                id: job_id,
                status: job.status,
                action: "cancel",
            });
        }

        // Holding the registration keeps `run_pending` from starting this job
        // while its record is closed below.
        let _claim = loop {
            if self.executor.admission.request_cancellation(job_id) {
                tracing::info!(%job_id, "cancellation requested");
                return Ok(CancelOutcome::Signalled);
            }
            match JobRegistration::register(&self.executor.admission, job_id) {
                Ok(registration) => break registration,
                Err(JobError::AlreadyRegistered(_)) => continue,
                Err(err) => return Err(err),
            }
        };

        // No live execution. Only a still-pending record is ours to close.
        let mut current = self
            .executor
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))?;
        if current.status != JobStatus::Pending {
            tracing::debug!(%job_id, status = %current.status, "nothing to cancel");
            return Ok(CancelOutcome::NoOp);
        }

        current.mark_cancelled(CANCELLED_BEFORE_EXECUTION_MESSAGE)?;
        self.executor.store.update(&current).await?;
        telemetry::record_job_finished(
            job_id.to_string(),
            &current.job_type,
            current.status.as_str(),
        );
        Ok(CancelOutcome::CancelledBeforeExecution)
    }

    pub async fn get(&self, job_id: JobId) -> Result<JobRecord, JobError> {
        self.executor
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    pub async fn list(&self, query: &JobQuery) -> Result<JobPage, JobError> {
        Ok(self.executor.store.list(query).await?)
    }

    pub async fn summary(&self) -> Result<JobSummary, JobError> {
        Ok(self.executor.store.summary().await?)
    }

    /// Slot usage per configured type.
    pub fn concurrency(&self) -> Vec<SlotUsage> {
        self.executor.admission.snapshot()
    }

    /// Cancel every in-flight and waiting job, then wait for background
    /// executions to record their final status.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("initiating engine shutdown");

        self.executor.shutdown.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.shutdown_timeout_ms);

        for handle in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("job task failed: {:?}", e),
                Err(_) => {
                    tracing::warn!("job task timed out during shutdown")
                }
            }
        }

        tracing::info!("engine shutdown complete");
        Ok(())
    }

    /// Number of background executions not yet finished.
    pub fn running_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

/// The parts of the engine a background execution needs to own.
struct Executor<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    store: Arc<S>,
    handler: Arc<H>,
    registry: Arc<JobTypeRegistry>,
    admission: Arc<AdmissionController>,
    identity: Arc<dyn ProcessIdentity>,
    shutdown: CancellationHandle,
}

impl<S, H> Clone for Executor<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            admission: Arc::clone(&self.admission),
            identity: Arc::clone(&self.identity),
            shutdown: self.shutdown.clone(),
        }
    }
}

enum WorkOutcome {
    Completed,
    Cancelled,
    Failed(JobError),
}

impl<S, H> Executor<S, H>
where
    S: JobStore + 'static,
    H: WorkHandler + 'static,
{
    /// Validate the type, register a handle and store the `Pending` record.
    async fn persist_new(
        &self,
        job_type: &str,
        payload: Option<String>,
    ) -> Result<(JobRecord, JobRegistration), JobError> {
        if !self.registry.contains(job_type) {
            return Err(JobError::UnknownType(job_type.to_string()));
        }

        let job = JobRecord::pending(job_type, payload);
        let registration = JobRegistration::register(&self.admission, job.id)?;
        self.store.insert(&job).await?;
        telemetry::record_job_created(job.id.to_string(), &job.job_type);

        Ok((job, registration))
    }

    async fn execute(
        &self,
        mut job: JobRecord,
        registration: JobRegistration,
        caller: Option<CancellationHandle>,
    ) -> Result<JobRecord, JobError> {
        let mut signal = MergedSignal::new([registration.handle.clone(), self.shutdown.clone()]);
        if let Some(caller) = caller {
            signal = signal.with(caller);
        }

        let config = match self.registry.lookup(&job.job_type) {
            Some(config) => config.clone(),
            None => {
                let err = JobError::UnknownType(job.job_type.clone());
                return self.finish(job, WorkOutcome::Failed(err)).await;
            }
        };

        let admission_span = telemetry::admission_span(job.id.to_string(), &job.job_type);
        let acquired = self
            .admission
            .acquire(&job.job_type, &signal)
            .instrument(admission_span)
            .await;
        let permit = match acquired {
            Ok(permit) => permit,
            Err(JobError::Cancelled) => {
                job.mark_cancelled(CANCELLED_WAITING_MESSAGE)?;
                self.store.update(&job).await?;
                telemetry::record_job_finished(
                    job.id.to_string(),
                    &job.job_type,
                    job.status.as_str(),
                );
                return Ok(job);
            }
            Err(err) => return self.finish(job, WorkOutcome::Failed(err)).await,
        };

        let timing = telemetry::record_job_start(job.id.to_string());
        job.mark_in_progress(self.identity.current_instance_id().clone())?;
        self.store.update(&job).await?;
        tracing::info!(job_id = %job.id, job_type = %job.job_type, "job started");

        let outcome = tokio::select! {
            biased;
            _ = signal.cancelled() => WorkOutcome::Cancelled,
            result = AssertUnwindSafe(self.handler.run(&job, &config)).catch_unwind() => {
                match result {
                    Ok(Ok(())) => WorkOutcome::Completed,
                    Ok(Err(err)) => {
                        WorkOutcome::Failed(JobError::ExecutionFailure(format!("{err:#}")))
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        WorkOutcome::Failed(JobError::ExecutionFailure(message))
                    }
                }
            }
        };

        let job = self.finish(job, outcome).await?;
        telemetry::record_job_end(timing, &job.job_type, job.status.as_str());

        drop(permit);
        if let Some(available) = self.admission.available_slots(&job.job_type) {
            telemetry::set_available_slots(&job.job_type, available);
        }
        Ok(job)
    }

    async fn finish(
        &self,
        mut job: JobRecord,
        outcome: WorkOutcome,
    ) -> Result<JobRecord, JobError> {
        match outcome {
            WorkOutcome::Completed => job.mark_completed()?,
            WorkOutcome::Cancelled => job.mark_cancelled(CANCELLED_RUNNING_MESSAGE)?,
            WorkOutcome::Failed(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "job failed");
                job.mark_failed(err.recorded_message())?
            }
        }
        self.store.update(&job).await?;
        telemetry::record_job_finished(job.id.to_string(), &job.job_type, job.status.as_str());
        Ok(job)
    }
}

/// Cancellation handle registration that is removed when dropped, on
/// every exit path of the execution holding it.
struct JobRegistration {
    admission: Arc<AdmissionController>,
    job_id: JobId,
    handle: CancellationHandle,
}

impl JobRegistration {
    fn register(admission: &Arc<AdmissionController>, job_id: JobId) -> Result<Self, JobError> {
        let handle = admission.register_cancellation_handle(job_id)?;
        Ok(Self {
            admission: Arc::clone(admission),
            job_id,
            handle,
        })
    }
}

impl Drop for JobRegistration {
    fn drop(&mut self) {
        self.admission.unregister(self.job_id);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("job handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("job handler panicked: {message}")
    } else {
        "job handler panicked".to_string()
    }
}
