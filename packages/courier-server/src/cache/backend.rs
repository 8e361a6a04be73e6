//! Key-value cache backend contract.
//!
//! Shaped after a remote cache server: opaque byte values and bounded
//! lists under string keys, every write carrying a TTL. Each operation is
//! atomic for its key. The in-process implementation is
//! [`MemoryCacheBackend`](super::MemoryCacheBackend); a networked cache
//! plugs in by implementing [`CacheBackend`].

use std::time::Duration;

use async_trait::async_trait;

/// Failure talking to, or interpreting data from, a cache backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// The key holds a value of another shape (e.g. a list where a counter was expected).
    #[error("wrong value type at key {key}")]
    WrongType { key: String },
    /// A stored value could not be encoded or decoded.
    #[error("cache codec error: {0}")]
    Codec(String),
}

/// End of a list that a push inserts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    /// Insert at the head; trimming drops from the tail.
    Front,
    /// Insert at the tail; trimming drops from the head.
    Back,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value`, replacing whatever the key held.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes the key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Adds `delta` to an existing decimal counter and resets its TTL.
    ///
    /// A missing key stays missing and `None` is returned.
    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, CacheError>;

    /// Decrements an existing counter only if it is above zero, resetting its TTL.
    ///
    /// Returns the counter after the call, or `None` if the key is missing.
    async fn decr_if_positive(&self, key: &str, ttl: Duration) -> Result<Option<i64>, CacheError>;

    /// Pushes `values` as a block at `end`, keeping their order, then trims the
    /// list to `max_len` from the opposite end and resets its TTL.
    ///
    /// Returns the list length after trimming.
    async fn list_push(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        end: ListEnd,
        max_len: usize,
        ttl: Duration,
    ) -> Result<usize, CacheError>;

    /// Like [`list_push`](Self::list_push), but only when the list already
    /// exists. Returns `None` without writing anything otherwise.
    async fn list_push_existing(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        end: ListEnd,
        max_len: usize,
        ttl: Duration,
    ) -> Result<Option<usize>, CacheError>;

    /// Replaces the whole list with the first `max_len` of `values`.
    ///
    /// An empty `values` removes the key.
    async fn list_replace(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        max_len: usize,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Every element of the list, head first. A missing key is an empty list.
    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>, CacheError>;

    async fn list_len(&self, key: &str) -> Result<usize, CacheError>;

    /// Stores `value` only if the key is absent. Returns whether it was stored.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool, CacheError>;

    /// Removes the key only if it currently holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, CacheError>;

    /// Drops expired entries eagerly. Backends that expire on their own
    /// keep the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}
