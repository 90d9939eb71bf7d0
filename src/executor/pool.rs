use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_WORKER_COUNT: usize = 40;

/// Bounds how many item handlers run at once on this machine.
///
/// One pool is shared by every job an executor runs. Callers own the `JoinSet` so each batch
/// can wait for exactly its own items.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running an item.
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queues `task` into `tasks`. It starts once a worker is free.
    pub fn spawn<F>(&self, tasks: &mut JoinSet<F::Output>, task: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tasks.spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await;
            task.await
        });
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_COUNT)
    }
}
