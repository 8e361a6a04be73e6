//! Reconnect reconciliation.
//!
//! When a receiver opens a stream, deliveries that were recorded while it
//! was offline are brought forward to `NotViewed`. The pending queue is the
//! fast path; if it is empty or unavailable, the durable store is scanned.
//! Each pass is one `advance_status` transaction, so it is idempotent.

use std::collections::HashSet;
use std::sync::Arc;

use courier_core::{DeliveryRecord, DeliveryStatus, NoticeId, ServerEvent, UserId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{NotificationCache, PendingNotice};
use crate::error::CourierError;
use crate::traits::{AdvanceScope, DeliveryStore, LiveRegistry};

/// Where a reconciliation pass found its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileSource {
    /// The cached pending queue was non-empty.
    Queue,
    /// The queue was empty; the durable store scan advanced records.
    Scan,
    /// Nothing needed advancing.
    Nothing,
}

impl ReconcileSource {
    /// Metric label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Scan => "scan",
            Self::Nothing => "nothing",
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub source: ReconcileSource,
    /// Records moved from `NotReceived` to `NotViewed`.
    pub advanced: Vec<DeliveryRecord>,
    /// Queued notices re-sent to the live connection.
    pub replayed: usize,
}

/// Advances offline deliveries for a receiver that just connected.
pub struct ReconciliationService {
    store: Arc<dyn DeliveryStore>,
    cache: Arc<NotificationCache>,
    registry: Arc<dyn LiveRegistry>,
    replay: bool,
}

impl ReconciliationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        cache: Arc<NotificationCache>,
        registry: Arc<dyn LiveRegistry>,
        replay: bool,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            replay,
        }
    }

    /// Runs one pass for `receiver`.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Store`] if the durable transition fails. The
    /// pending queue is cleared even then; the next pass falls back to a scan.
    pub async fn run(&self, receiver: UserId) -> Result<ReconcileReport, CourierError> {
        let queued = self.cache.pending(receiver).await;

        let report = if queued.is_empty() {
            let advanced = self
                .store
                .advance_status(receiver, AdvanceScope::All, DeliveryStatus::NotViewed)
                .await?;
            let source = if advanced.is_empty() {
                ReconcileSource::Nothing
            } else {
                ReconcileSource::Scan
            };
            ReconcileReport {
                source,
                advanced,
                replayed: 0,
            }
        } else {
            let ids: Vec<NoticeId> = queued.iter().map(|p| p.view.notice_id).collect();
            let result = self
                .store
                .advance_status(receiver, AdvanceScope::Notices(&ids), DeliveryStatus::NotViewed)
                .await;
            self.cache.clear_pending(receiver).await;
            let advanced = result?;

            let replayed = if self.replay {
                self.replay_queued(receiver, &queued, &advanced)
            } else {
                0
            };
            ReconcileReport {
                source: ReconcileSource::Queue,
                advanced,
                replayed,
            }
        };

        if !report.advanced.is_empty() {
            self.cache.invalidate_recent(receiver).await;
        }
        metrics::counter!("courier_reconciled_total", "source" => report.source.label())
            .increment(report.advanced.len() as u64);
        info!(
            receiver_id = %receiver,
            source = report.source.label(),
            advanced = report.advanced.len(),
            replayed = report.replayed,
            "reconciled receiver"
        );
        Ok(report)
    }

    /// Re-sends queued views whose records just advanced, oldest first.
    /// Stops at the first failed write.
    fn replay_queued(
        &self,
        receiver: UserId,
        queued: &[PendingNotice],
        advanced: &[DeliveryRecord],
    ) -> usize {
        let advanced: HashSet<NoticeId> = advanced.iter().map(|r| r.notice_id).collect();
        let mut replayed = 0;
        for pending in queued {
            if !advanced.contains(&pending.view.notice_id) {
                continue;
            }
            let mut view = pending.view.clone();
            view.status = DeliveryStatus::NotViewed;
            let outcome = self.registry.push(receiver, &ServerEvent::notification(view));
            if !outcome.is_delivered() {
                warn!(receiver_id = %receiver, outcome = outcome.label(), "replay interrupted");
                break;
            }
            debug!(receiver_id = %receiver, notice_id = %pending.view.notice_id, "replayed queued notice");
            replayed += 1;
        }
        replayed
    }

    /// Runs a pass in the background. Failures are logged.
    pub fn spawn(self: &Arc<Self>, receiver: UserId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.run(receiver).await {
                warn!(receiver_id = %receiver, error = %err, "reconciliation failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{DeliveryKey, NoticeDraft, NoticeType, NoticeView};

    use super::*;
    use crate::cache::{CacheConfig, MemoryCacheBackend};
    use crate::network::connection::{ChannelSink, ConnectionRegistry, OutboundMessage};
    use crate::storage::MemoryDeliveryStore;

    struct Fixture {
        store: Arc<MemoryDeliveryStore>,
        cache: Arc<NotificationCache>,
        registry: Arc<ConnectionRegistry>,
        service: Arc<ReconciliationService>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryDeliveryStore::new());
        let cache = Arc::new(NotificationCache::new(
            Arc::new(MemoryCacheBackend::new()),
            CacheConfig::default(),
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let service = Arc::new(ReconciliationService::new(
            store.clone(),
            cache.clone(),
            registry.clone(),
            true,
        ));
        Fixture {
            store,
            cache,
            registry,
            service,
        }
    }

    async fn notice_for(store: &MemoryDeliveryStore, receiver: UserId) -> NoticeView {
        let notice = store
            .create_notice(
                NoticeDraft {
                    sender: UserId(1),
                    notice_type: NoticeType::NewTask,
                    content: "assigned".to_string(),
                    related_id: None,
                    created_at: 5,
                },
                &[receiver],
            )
            .await
            .unwrap();
        NoticeView::project(&notice, DeliveryStatus::NotReceived, None)
    }

    async fn status(store: &MemoryDeliveryStore, notice_id: NoticeId, receiver: UserId) -> DeliveryStatus {
        store
            .get_delivery(DeliveryKey::new(notice_id, receiver))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn queue_pass_advances_replays_and_clears() {
        let f = fixture();
        let r = UserId(2);
        let view = notice_for(&f.store, r).await;
        f.cache.enqueue_pending(r, &view).await;

        let (sink, mut rx) = ChannelSink::channel(8);
        f.registry.register(r, Box::new(sink));

        let report = f.service.run(r).await.unwrap();
        assert_eq!(report.source, ReconcileSource::Queue);
        assert_eq!(report.advanced.len(), 1);
        assert_eq!(report.replayed, 1);
        assert_eq!(status(&f.store, view.notice_id, r).await, DeliveryStatus::NotViewed);
        assert_eq!(f.cache.pending_count(r).await, 0);

        match rx.try_recv().unwrap() {
            OutboundMessage::Event(ServerEvent::Notification { payload }) => {
                assert_eq!(payload.notice_id, view.notice_id);
                assert_eq!(payload.status, DeliveryStatus::NotViewed);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_queue_falls_back_to_scan() {
        let f = fixture();
        let r = UserId(2);
        let view = notice_for(&f.store, r).await;

        let report = f.service.run(r).await.unwrap();
        assert_eq!(report.source, ReconcileSource::Scan);
        assert_eq!(report.replayed, 0);
        assert_eq!(status(&f.store, view.notice_id, r).await, DeliveryStatus::NotViewed);
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let f = fixture();
        let r = UserId(2);
        let view = notice_for(&f.store, r).await;
        f.cache.enqueue_pending(r, &view).await;

        f.service.run(r).await.unwrap();
        let again = f.service.run(r).await.unwrap();

        assert_eq!(again.source, ReconcileSource::Nothing);
        assert!(again.advanced.is_empty());
        assert_eq!(status(&f.store, view.notice_id, r).await, DeliveryStatus::NotViewed);
    }

    #[tokio::test]
    async fn viewed_records_are_not_replayed() {
        let f = fixture();
        let r = UserId(2);
        let view = notice_for(&f.store, r).await;
        f.cache.enqueue_pending(r, &view).await;
        f.store
            .advance_status(r, AdvanceScope::All, DeliveryStatus::Viewed)
            .await
            .unwrap();

        let (sink, mut rx) = ChannelSink::channel(8);
        f.registry.register(r, Box::new(sink));

        let report = f.service.run(r).await.unwrap();
        assert!(report.advanced.is_empty());
        assert_eq!(report.replayed, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(status(&f.store, view.notice_id, r).await, DeliveryStatus::Viewed);
    }
}
