// ABOUTME: Minimal task group: launch, join, and keep the first error.
// ABOUTME: Launched tasks always run to completion; nothing is cancelled.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Tracks a set of spawned tasks and the first error any of them returned.
pub struct TaskGroup<E> {
    handles: Vec<JoinHandle<()>>,
    first_error: Arc<Mutex<Option<E>>>,
}

impl<E: Send + 'static> Default for TaskGroup<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> TaskGroup<E> {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn `task`. An error it returns is kept only if no earlier one was.
    pub fn go<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let first_error = Arc::clone(&self.first_error);
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = task.await {
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(e);
                }
            }
        }));
    }

    /// Number of tasks launched so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait until every launched task has finished.
    ///
    /// Cancel-safe: handles are only removed once their task is done, so a
    /// dropped `wait` leaves the remaining tasks tracked.
    pub async fn wait(&mut self) {
        while let Some(handle) = self.handles.last_mut() {
            if let Err(e) = handle.await {
                tracing::warn!("task group member did not complete: {}", e);
            }
            self.handles.pop();
        }
    }

    /// Take the first recorded error, if any.
    pub fn take_error(&self) -> Option<E> {
        self.first_error.lock().take()
    }
}
