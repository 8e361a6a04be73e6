//! Bounded pool for cache population jobs.
//!
//! A job takes a slot (running or waiting) and then a worker permit. When
//! every slot is taken the caller runs the job inline, so work is never
//! dropped and the backlog never grows past `workers + queue_capacity`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use super::config::PoolConfig;

/// How a submitted job was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the pool; runs in the background.
    Spawned,
    /// The pool was saturated; the job already ran on the caller.
    CallerRan,
}

/// Caller-runs bounded executor for best-effort cache writes.
#[derive(Debug, Clone)]
pub struct CachePopulator {
    slots: Arc<Semaphore>,
    workers: Arc<Semaphore>,
}

impl CachePopulator {
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            slots: Arc::new(Semaphore::new(workers + config.queue_capacity)),
            workers: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Runs `job` on the pool, or inline if the pool is saturated.
    pub async fn submit<F>(&self, job: F) -> Dispatch
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            debug!("cache population pool saturated, running on caller");
            job.await;
            return Dispatch::CallerRan;
        };

        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let _slot = slot;
            // The worker semaphore is never closed.
            if let Ok(_worker) = workers.acquire_owned().await {
                job.await;
            }
        });
        Dispatch::Spawned
    }

    /// Slots not currently taken by running or waiting jobs.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}
