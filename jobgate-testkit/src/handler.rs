use async_trait::async_trait;
use jobgate::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a [`RecordingHandler`] does with each job.
#[derive(Clone, Debug)]
pub enum HandlerBehavior {
    /// Wait for the type's configured work duration, then succeed.
    Sleep,
    /// Return an error with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

/// [`WorkHandler`] that records every run and tracks how many run at once.
#[derive(Clone)]
pub struct RecordingHandler {
    behavior: Arc<Mutex<HandlerBehavior>>,
    runs: Arc<Mutex<Vec<JobId>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::with_behavior(HandlerBehavior::Sleep)
    }

    pub fn with_behavior(behavior: HandlerBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            runs: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_behavior(&self, behavior: HandlerBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Jobs that entered the handler, in order.
    pub fn runs(&self) -> Vec<JobId> {
        self.runs.lock().clone()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous runs observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the running count however the run ends, including when the
/// engine drops the run on cancellation.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkHandler for RecordingHandler {
    async fn run(&self, job: &JobRecord, config: &JobTypeConfig) -> anyhow::Result<()> {
        self.runs.lock().push(job.id);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(Arc::clone(&self.running));

        let behavior = self.behavior.lock().clone();
        match behavior {
            HandlerBehavior::Sleep => {
                tokio::time::sleep(config.work_duration()).await;
                Ok(())
            }
            HandlerBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
            HandlerBehavior::Panic(message) => panic!("{}", message),
        }
    }
}
