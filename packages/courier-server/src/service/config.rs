use std::time::Duration;

/// Service-level configuration for the notification services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bounded pool used to populate caches after a read miss.
    pub pool: PoolConfig,
    /// Whether reconciliation re-sends queued notices to the new connection.
    pub replay_pending_on_connect: bool,
    /// Interval between eager sweeps of expired cache entries.
    pub cache_sweep_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            replay_pending_on_connect: true,
            cache_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Size of the cache population pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Jobs that may run concurrently.
    pub workers: usize,
    /// Jobs that may wait for a worker. Beyond `workers + queue_capacity`
    /// the submitting caller runs the job itself.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 15,
            queue_capacity: 100,
        }
    }
}
