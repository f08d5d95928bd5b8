//! Bounded pool for CPU-heavy codec work (batch inflate/deflate).
//!
//! Jobs run on tokio's blocking threads; a semaphore caps how many run at
//! once so a burst of large batches cannot starve the runtime. Submitted jobs
//! are never cancelled.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

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

    /// Starts `job` as soon as a slot is free and returns its handle right away
    pub fn spawn<F, T>(&self, job: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            match tokio::task::spawn_blocking(job).await {
                Ok(value) => value,
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        })
    }

    /// Runs `job` on the pool and waits for it
    pub async fn run<F, T>(&self, job: F) -> Result<T, tokio::task::JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(job).await
    }
}
