//! Notice fanout and per-receiver read operations.
//!
//! Durable writes always come first; cache updates and live pushes follow
//! and are best-effort. A failed durable write returns before any cache
//! mutation.

use std::sync::Arc;

use courier_core::{
    fanout_targets, Audience, DeliveryKey, DeliveryStatus, NoticeEvent, NoticeId, NoticeView,
    ServerEvent, UnreadStatus, UserId,
};
use tracing::{debug, info, warn};

use super::populator::CachePopulator;
use crate::cache::NotificationCache;
use crate::error::CourierError;
use crate::network::connection::PushOutcome;
use crate::traits::{AdvanceScope, DeliveryStore, LiveRegistry, StatusFilter};

/// Result of announcing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyReport {
    pub notice_id: NoticeId,
    /// Receivers reached over a live connection.
    pub delivered: usize,
    /// Receivers whose notice was queued for replay.
    pub queued: usize,
}

/// Orchestrates the durable store, the cache, and the live registry.
pub struct NotificationService {
    store: Arc<dyn DeliveryStore>,
    cache: Arc<NotificationCache>,
    registry: Arc<dyn LiveRegistry>,
    populator: CachePopulator,
}

impl NotificationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        cache: Arc<NotificationCache>,
        registry: Arc<dyn LiveRegistry>,
        populator: CachePopulator,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            populator,
        }
    }

    /// Every notice of `receiver`, newest first, straight from the durable store.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the durable read fails.
    pub async fn get_all_notices(&self, receiver: UserId) -> Result<Vec<NoticeView>, CourierError> {
        Ok(self.store.find_views(receiver, StatusFilter::Any).await?)
    }

    /// Unread notices of `receiver`, newest first.
    ///
    /// Served from the recent-notices cache when it holds anything; otherwise
    /// read from the durable store and written back in the background. A
    /// cache hit holds at most the configured recent capacity.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the fallback read fails.
    pub async fn get_unread_notices(
        &self,
        receiver: UserId,
    ) -> Result<Vec<NoticeView>, CourierError> {
        if let Some(cached) = self.cache.get_recent(receiver).await {
            debug!(receiver_id = %receiver, count = cached.len(), "unread notices served from cache");
            return Ok(cached);
        }

        let views = self.store.find_views(receiver, StatusFilter::Unread).await?;
        if !views.is_empty() {
            let cache = Arc::clone(&self.cache);
            let snapshot: Vec<NoticeView> = views
                .iter()
                .take(cache.config().recent_capacity)
                .cloned()
                .collect();
            self.populator
                .submit(async move {
                    cache.replace_recent(receiver, &snapshot).await;
                })
                .await;
        }
        Ok(views)
    }

    /// Unread summary of `receiver`, cached on a miss when non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the fallback count fails.
    pub async fn check_unread_status(&self, receiver: UserId) -> Result<UnreadStatus, CourierError> {
        if let Some(count) = self.cache.get_unread(receiver).await {
            return Ok(UnreadStatus::from_count(count));
        }

        let count = self.store.count_unread(receiver).await?;
        if count > 0 {
            self.cache.set_unread(receiver, count).await;
        }
        Ok(UnreadStatus::from_count(count))
    }

    /// Creates one notice for `event` and delivers it to every target.
    ///
    /// The sender never receives its own notice. Returns `None` when no
    /// receiver is left, in which case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if resolving the audience or the
    /// durable write fails; no cache entry is touched in that case.
    pub async fn notify(&self, event: &NoticeEvent) -> Result<Option<NotifyReport>, CourierError> {
        let candidates = match &event.audience {
            Audience::Receivers(ids) => ids.clone(),
            Audience::Everyone => self.store.list_receivers().await?,
        };
        let targets = fanout_targets(event.sender, &candidates);
        if targets.is_empty() {
            debug!(sender_id = %event.sender, "no receivers left, notice not created");
            return Ok(None);
        }

        let notice = self.store.create_notice(event.draft(), &targets).await?;
        metrics::counter!("courier_notices_created_total").increment(1);

        let sender_name = self
            .store
            .receiver_name(event.sender)
            .await
            .unwrap_or_else(|err| {
                warn!(sender_id = %event.sender, error = %err, "sender name lookup failed");
                None
            });
        let view = NoticeView::project(&notice, DeliveryStatus::NotReceived, sender_name);

        let mut report = NotifyReport {
            notice_id: notice.id,
            delivered: 0,
            queued: 0,
        };
        for &receiver in &targets {
            if self.cache.increment_unread(receiver).await.is_none() {
                self.seed_unread(receiver).await;
            }
            self.cache.prepend_recent_if_cached(receiver, &view).await;

            if self.deliver(receiver, &view).await {
                report.delivered += 1;
            } else {
                self.cache.enqueue_pending(receiver, &view).await;
                report.queued += 1;
            }
        }

        info!(
            notice_id = %notice.id,
            receivers = targets.len(),
            delivered = report.delivered,
            queued = report.queued,
            "notice fanned out"
        );
        Ok(Some(report))
    }

    /// Caches the durable unread count of a receiver that had none cached.
    async fn seed_unread(&self, receiver: UserId) {
        match self.store.count_unread(receiver).await {
            Ok(count) => self.cache.set_unread(receiver, count).await,
            Err(err) => {
                warn!(receiver_id = %receiver, error = %err, "unread count lookup failed");
            }
        }
    }

    /// Pushes `view` live. On success the record moves to `NotViewed` and the
    /// cached recent list, which still holds it as `NotReceived`, is dropped.
    /// If the durable write fails the next reconciliation pass catches it up.
    async fn deliver(&self, receiver: UserId, view: &NoticeView) -> bool {
        let mut live = view.clone();
        live.status = DeliveryStatus::NotViewed;

        match self.registry.push(receiver, &ServerEvent::notification(live)) {
            PushOutcome::Delivered => {
                let ids = [view.notice_id];
                match self
                    .store
                    .advance_status(receiver, AdvanceScope::Notices(&ids), DeliveryStatus::NotViewed)
                    .await
                {
                    Ok(changed) if !changed.is_empty() => {
                        self.cache.invalidate_recent(receiver).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(receiver_id = %receiver, notice_id = %view.notice_id, error = %err, "failed to record live delivery");
                    }
                }
                true
            }
            PushOutcome::Offline => {
                debug!(receiver_id = %receiver, notice_id = %view.notice_id, "receiver offline, queueing");
                false
            }
            PushOutcome::Evicted(err) => {
                debug!(receiver_id = %receiver, notice_id = %view.notice_id, error = %err, "push failed, queueing");
                false
            }
        }
    }

    /// Marks one notice as viewed. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the durable transition fails.
    pub async fn mark_as_read(
        &self,
        receiver: UserId,
        notice_id: NoticeId,
    ) -> Result<bool, CourierError> {
        let ids = [notice_id];
        let changed = self
            .store
            .advance_status(receiver, AdvanceScope::Notices(&ids), DeliveryStatus::Viewed)
            .await?;
        if changed.is_empty() {
            return Ok(false);
        }

        self.cache.decrement_unread(receiver).await;
        self.cache.invalidate_all(receiver).await;
        debug!(receiver_id = %receiver, notice_id = %notice_id, "marked notice read");
        Ok(true)
    }

    /// Marks every unread notice of `receiver` as viewed in one write.
    /// Returns how many records changed.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the durable transition fails.
    pub async fn mark_all_as_read(&self, receiver: UserId) -> Result<usize, CourierError> {
        let changed = self
            .store
            .advance_status(receiver, AdvanceScope::All, DeliveryStatus::Viewed)
            .await?;

        self.cache.clear_unread(receiver).await;
        self.cache.invalidate_recent(receiver).await;
        info!(receiver_id = %receiver, count = changed.len(), "marked all notices read");
        Ok(changed.len())
    }

    /// Removes `receiver`'s delivery of a notice. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the durable delete fails.
    pub async fn delete_notice(
        &self,
        receiver: UserId,
        notice_id: NoticeId,
    ) -> Result<bool, CourierError> {
        let Some(removed) = self
            .store
            .delete_delivery(DeliveryKey::new(notice_id, receiver))
            .await?
        else {
            return Ok(false);
        };

        if removed.status.is_unread() {
            self.cache.decrement_unread(receiver).await;
        }
        self.cache.invalidate_all(receiver).await;
        debug!(receiver_id = %receiver, notice_id = %notice_id, "deleted notice");
        Ok(true)
    }
}
