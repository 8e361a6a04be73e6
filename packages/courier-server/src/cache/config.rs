//! Cache layer configuration.

use std::time::Duration;

/// TTLs and bounds for the per-receiver cache namespaces.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of a cached unread count, reset on every write.
    pub unread_ttl: Duration,
    /// Lifetime of a cached recent-notices list, reset on every write.
    pub recent_ttl: Duration,
    /// Lifetime of a pending-notice queue, reset on every enqueue.
    pub pending_ttl: Duration,
    /// Maximum number of entries kept in a recent-notices list.
    pub recent_capacity: usize,
    /// Maximum number of entries kept in a pending queue; oldest dropped first.
    pub pending_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            unread_ttl: Duration::from_secs(24 * 60 * 60),
            recent_ttl: Duration::from_secs(5 * 60),
            pending_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            recent_capacity: 10,
            pending_capacity: 50,
        }
    }
}
