//! Typed, best-effort façade over a [`CacheBackend`].
//!
//! Backend failures never escape: a failed read is reported as a miss and a
//! failed write is dropped. Both are logged at `warn` and counted in
//! `courier_cache_fallback_total{kind}`.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{now_millis, NoticeView, UserId};

use super::backend::{CacheBackend, CacheError, ListEnd};
use super::config::CacheConfig;
use super::namespace::{
    receiver_key, CacheNamespace, LockToken, Locks, PendingNotice, PendingNotices, RecentNotices,
    UnreadCount,
};

fn absorb<T>(kind: &'static str, key: &str, result: Result<T, CacheError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, kind, error = %err, "cache operation failed, falling back");
            metrics::counter!("courier_cache_fallback_total", "kind" => kind).increment(1);
            None
        }
    }
}

fn encode_all<N: CacheNamespace>(values: &[N::Value]) -> Result<Vec<Vec<u8>>, CacheError> {
    values.iter().map(N::encode).collect()
}

fn decode_all<N: CacheNamespace>(items: &[Vec<u8>]) -> Result<Vec<N::Value>, CacheError> {
    items.iter().map(|bytes| N::decode(bytes)).collect()
}

/// Per-receiver unread counts, recent-notice lists, pending queues, and locks.
pub struct NotificationCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl NotificationCache {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    // -----------------------------------------------------------------------
    // Unread count
    // -----------------------------------------------------------------------

    /// Bumps a cached count. A receiver with no cached count is left alone so
    /// the next read recomputes it from the durable store.
    pub async fn increment_unread(&self, receiver: UserId) -> Option<i64> {
        let key = receiver_key::<UnreadCount>(receiver);
        absorb(
            "unread_increment",
            &key,
            self.backend.incr_by(&key, 1, self.config.unread_ttl).await,
        )
        .flatten()
    }

    /// Lowers a cached count by one; never below zero.
    pub async fn decrement_unread(&self, receiver: UserId) -> Option<i64> {
        let key = receiver_key::<UnreadCount>(receiver);
        absorb(
            "unread_decrement",
            &key,
            self.backend
                .decr_if_positive(&key, self.config.unread_ttl)
                .await,
        )
        .flatten()
    }

    pub async fn set_unread(&self, receiver: UserId, count: u64) {
        let key = receiver_key::<UnreadCount>(receiver);
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        let result = match UnreadCount::encode(&count) {
            Ok(bytes) => self.backend.set(&key, bytes, self.config.unread_ttl).await,
            Err(err) => Err(err),
        };
        absorb("unread_set", &key, result);
    }

    pub async fn get_unread(&self, receiver: UserId) -> Option<u64> {
        let key = receiver_key::<UnreadCount>(receiver);
        let result = match self.backend.get(&key).await {
            Ok(Some(bytes)) => UnreadCount::decode(&bytes).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        absorb("unread_get", &key, result)
            .flatten()
            .map(|count| u64::try_from(count).unwrap_or(0))
    }

    pub async fn clear_unread(&self, receiver: UserId) {
        let key = receiver_key::<UnreadCount>(receiver);
        absorb("unread_clear", &key, self.backend.delete(&key).await);
    }

    // -----------------------------------------------------------------------
    // Recent notices
    // -----------------------------------------------------------------------

    /// Puts `view` at the head of the receiver's recent list.
    pub async fn append_recent(&self, receiver: UserId, view: &NoticeView) {
        self.append_recent_batch(receiver, std::slice::from_ref(view))
            .await;
    }

    /// Puts `views` (newest first) at the head of the receiver's recent list.
    pub async fn append_recent_batch(&self, receiver: UserId, views: &[NoticeView]) {
        if views.is_empty() {
            return;
        }
        let key = receiver_key::<RecentNotices>(receiver);
        let result = match encode_all::<RecentNotices>(views) {
            Ok(items) => self
                .backend
                .list_push(
                    &key,
                    items,
                    ListEnd::Front,
                    self.config.recent_capacity,
                    self.config.recent_ttl,
                )
                .await
                .map(|_| ()),
            Err(err) => Err(err),
        };
        absorb("recent_append", &key, result);
    }

    /// Puts `view` at the head of the receiver's recent list if one is cached.
    ///
    /// A cold list is left to the read-through path, so a lone new entry never
    /// hides older unread notices. Returns whether the list was updated.
    pub async fn prepend_recent_if_cached(&self, receiver: UserId, view: &NoticeView) -> bool {
        let key = receiver_key::<RecentNotices>(receiver);
        let result = match RecentNotices::encode(view) {
            Ok(item) => self
                .backend
                .list_push_existing(
                    &key,
                    vec![item],
                    ListEnd::Front,
                    self.config.recent_capacity,
                    self.config.recent_ttl,
                )
                .await,
            Err(err) => Err(err),
        };
        absorb("recent_prepend", &key, result).flatten().is_some()
    }

    /// Overwrites the receiver's recent list with `views` (newest first).
    pub async fn replace_recent(&self, receiver: UserId, views: &[NoticeView]) {
        let key = receiver_key::<RecentNotices>(receiver);
        let result = match encode_all::<RecentNotices>(views) {
            Ok(items) => {
                self.backend
                    .list_replace(
                        &key,
                        items,
                        self.config.recent_capacity,
                        self.config.recent_ttl,
                    )
                    .await
            }
            Err(err) => Err(err),
        };
        absorb("recent_replace", &key, result);
    }

    /// The cached recent list, or `None` on a miss. An empty list is a miss.
    pub async fn get_recent(&self, receiver: UserId) -> Option<Vec<NoticeView>> {
        let key = receiver_key::<RecentNotices>(receiver);
        let result = match self.backend.list_range(&key).await {
            Ok(items) => decode_all::<RecentNotices>(&items),
            Err(err) => Err(err),
        };
        absorb("recent_get", &key, result).filter(|views| !views.is_empty())
    }

    pub async fn invalidate_recent(&self, receiver: UserId) {
        let key = receiver_key::<RecentNotices>(receiver);
        absorb("recent_invalidate", &key, self.backend.delete(&key).await);
    }

    // -----------------------------------------------------------------------
    // Pending queue
    // -----------------------------------------------------------------------

    /// Appends `view` to the receiver's offline queue, dropping the oldest
    /// entries beyond capacity.
    pub async fn enqueue_pending(&self, receiver: UserId, view: &NoticeView) {
        let key = receiver_key::<PendingNotices>(receiver);
        let pending = PendingNotice {
            view: view.clone(),
            queued_at: now_millis(),
        };
        let result = match PendingNotices::encode(&pending) {
            Ok(bytes) => self
                .backend
                .list_push(
                    &key,
                    vec![bytes],
                    ListEnd::Back,
                    self.config.pending_capacity,
                    self.config.pending_ttl,
                )
                .await
                .map(|_| ()),
            Err(err) => Err(err),
        };
        absorb("pending_enqueue", &key, result);
    }

    /// Queued entries, oldest first. A miss or failure reads as empty.
    pub async fn pending(&self, receiver: UserId) -> Vec<PendingNotice> {
        let key = receiver_key::<PendingNotices>(receiver);
        let result = match self.backend.list_range(&key).await {
            Ok(items) => decode_all::<PendingNotices>(&items),
            Err(err) => Err(err),
        };
        absorb("pending_get", &key, result).unwrap_or_default()
    }

    pub async fn clear_pending(&self, receiver: UserId) {
        let key = receiver_key::<PendingNotices>(receiver);
        absorb("pending_clear", &key, self.backend.delete(&key).await);
    }

    pub async fn pending_count(&self, receiver: UserId) -> usize {
        let key = receiver_key::<PendingNotices>(receiver);
        absorb("pending_count", &key, self.backend.list_len(&key).await).unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Invalidation and locks
    // -----------------------------------------------------------------------

    /// Drops the receiver's unread count and recent list. The pending queue
    /// is kept: it is owned by reconciliation.
    pub async fn invalidate_all(&self, receiver: UserId) {
        self.clear_unread(receiver).await;
        self.invalidate_recent(receiver).await;
    }

    /// Takes the lock `name` for `ttl` if nobody holds it.
    pub async fn try_lock(&self, name: &str, token: &LockToken, ttl: Duration) -> bool {
        let key = Locks::key(name);
        let result = match Locks::encode(token) {
            Ok(bytes) => self.backend.set_nx(&key, bytes, ttl).await,
            Err(err) => Err(err),
        };
        absorb("lock_acquire", &key, result).unwrap_or(false)
    }

    /// Releases the lock `name` only if `token` is the current holder.
    pub async fn release(&self, name: &str, token: &LockToken) -> bool {
        let key = Locks::key(name);
        let result = match Locks::encode(token) {
            Ok(bytes) => self.backend.delete_if_eq(&key, &bytes).await,
            Err(err) => Err(err),
        };
        absorb("lock_release", &key, result).unwrap_or(false)
    }
}
