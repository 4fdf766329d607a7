use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// One-shot cancellation signal shared between a requester and the task
/// that observes it.
///
/// Clones share state: cancelling any clone fires all of them.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    inner: Arc<CancellationInner>,
}

#[derive(Debug)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Returns `true` only for the call that fired it.
    pub fn cancel(&self) -> bool {
        let fired = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if fired {
            self.inner.notify.notify_waiters();
        }
        fired
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent
        // `cancel` cannot slip between the check and the wait.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Whether both handles share the same underlying signal.
    pub fn same_signal(&self, other: &CancellationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite signal that fires as soon as any of its sources fires.
///
/// Built at the start of a job's execution from the job's own handle and
/// any caller-level signals, and dropped when the execution ends.
#[derive(Clone, Debug, Default)]
pub struct MergedSignal {
    sources: Vec<CancellationHandle>,
}

impl MergedSignal {
    pub fn new(sources: impl IntoIterator<Item = CancellationHandle>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }

    /// Add another source.
    pub fn with(mut self, source: CancellationHandle) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(&self) -> &[CancellationHandle] {
        &self.sources
    }

    pub fn is_cancelled(&self) -> bool {
        self.sources.iter().any(CancellationHandle::is_cancelled)
    }

    /// Resolves when the first source fires. Never resolves without
    /// sources.
    pub async fn cancelled(&self) {
        if self.sources.is_empty() {
            return futures::future::pending().await;
        }
        let waits = self
            .sources
            .iter()
            .map(|source| Box::pin(source.cancelled()));
        select_all(waits).await;
    }

    /// Run `callback` once when the signal fires.
    ///
    /// The watcher task is detached; abort the returned handle to drop the
    /// callback without running it.
    pub fn on_cancel<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let signal = self.clone();
        tokio::spawn(async move {
            signal.cancelled().await;
            callback();
        })
    }

    /// Race `future` against the signal; `None` when cancelled first.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = future => Some(output),
        }
    }
}
