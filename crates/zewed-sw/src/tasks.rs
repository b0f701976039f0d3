//! Lifetime extension for background work.
//!
//! Work that outlives the handler that started it (cache writes, background
//! refreshes, fire-and-forget replays) is spawned through [`BackgroundTasks`]
//! so that it is never detached: the host (or a test) can `settle()` the
//! registry and know every extension has been released.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Default)]
struct Inner {
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    closed: AtomicBool,
}

/// Registry of background tasks.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BackgroundTasks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<(String, JoinHandle<()>)>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keep the worker alive until `future` completes.
    ///
    /// Returns `false` when the extension is refused (registry closed or no
    /// runtime); the future is dropped without running.
    pub fn extend<F>(&self, label: &str, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            debug!(task = label, "Lifetime extension refused: registry closed");
            return false;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(task = label, "Lifetime extension refused: no runtime");
                return false;
            }
        };

        let join = handle.spawn(future);
        let mut tasks = self.tasks();
        tasks.retain(|(_, task)| !task.is_finished());
        tasks.push((label.to_string(), join));
        trace!(task = label, pending = tasks.len(), "Lifetime extended");
        true
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.tasks()
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .count()
    }

    /// Wait for every task, including ones spawned while waiting.
    pub async fn settle(&self) {
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                return;
            }
            for (label, task) in batch {
                if let Err(e) = task.await {
                    warn!(task = %label, error = %e, "Background task did not complete");
                }
            }
        }
    }

    /// Refuse all further extensions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
