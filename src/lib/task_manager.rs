//! Task orchestrator for the exporter's long-lived subsystems.
//!
//! Every background task is spawned through the manager so that shutdown
//! can first wait for a graceful drain and then abort whatever is left.

use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Tracks the join handles of all spawned subsystem tasks.
#[derive(Debug, Default)]
pub struct TaskManager {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task on the runtime and track its handle.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .push(handle);
    }

    /// Wait for every tracked task to finish, consuming the handles.
    pub async fn join_all(&self) {
        let handles = std::mem::take(
            &mut *self.tasks.lock().expect("task list lock poisoned"),
        );
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Abort every still-tracked task. Follow up with [`join_all`] to
    /// observe completion of the aborted tasks.
    ///
    /// [`join_all`]: TaskManager::join_all
    pub async fn abort_all(&self) {
        let tasks = self.tasks.lock().expect("task list lock poisoned");
        for handle in tasks.iter() {
            handle.abort();
        }
    }
}
