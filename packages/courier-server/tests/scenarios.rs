//! End-to-end delivery scenarios over the in-memory backends.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    DeliveryKey, DeliveryRecord, DeliveryStatus, Notice, NoticeDraft, NoticeEvent, NoticeId,
    NoticeView, ServerEvent, UserId,
};
use courier_server::cache::{CacheBackend, CacheError, ListEnd, MemoryCacheBackend};
use courier_server::network::{ChannelSink, ConnectionRegistry, OutboundMessage};
use courier_server::service::{CourierConfig, NotificationHub, ReconcileSource};
use courier_server::storage::MemoryDeliveryStore;
use courier_server::{AdvanceScope, CourierError, DeliveryStore, LiveRegistry, StatusFilter};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Counts writes and decrements passing through to an in-memory backend.
#[derive(Default)]
struct RecordingBackend {
    inner: MemoryCacheBackend,
    writes: AtomicUsize,
    decrements: AtomicUsize,
}

impl RecordingBackend {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn decrements(&self) -> usize {
        self.decrements.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.wrote();
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.wrote();
        self.inner.delete(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<Option<i64>, CacheError> {
        self.wrote();
        self.inner.incr_by(key, delta, ttl).await
    }

    async fn decr_if_positive(&self, key: &str, ttl: Duration) -> Result<Option<i64>, CacheError> {
        self.wrote();
        self.decrements.fetch_add(1, Ordering::SeqCst);
        self.inner.decr_if_positive(key, ttl).await
    }

    async fn list_push(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        end: ListEnd,
        max_len: usize,
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        self.wrote();
        self.inner.list_push(key, values, end, max_len, ttl).await
    }

    async fn list_push_existing(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        end: ListEnd,
        max_len: usize,
        ttl: Duration,
    ) -> Result<Option<usize>, CacheError> {
        self.wrote();
        self.inner
            .list_push_existing(key, values, end, max_len, ttl)
            .await
    }

    async fn list_replace(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        max_len: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.wrote();
        self.inner.list_replace(key, values, max_len, ttl).await
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>, CacheError> {
        self.inner.list_range(key).await
    }

    async fn list_len(&self, key: &str) -> Result<usize, CacheError> {
        self.inner.list_len(key).await
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool, CacheError> {
        self.wrote();
        self.inner.set_nx(key, value, ttl).await
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, CacheError> {
        self.wrote();
        self.inner.delete_if_eq(key, expected).await
    }
}

/// Delegates to a memory store; mutating calls fail while `failing` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryDeliveryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("durable store offline");
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for FlakyStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.inner.initialize().await
    }

    async fn upsert_receiver(&self, receiver: UserId, name: &str) -> anyhow::Result<()> {
        self.inner.upsert_receiver(receiver, name).await
    }

    async fn receiver_exists(&self, receiver: UserId) -> anyhow::Result<bool> {
        self.inner.receiver_exists(receiver).await
    }

    async fn receiver_name(&self, receiver: UserId) -> anyhow::Result<Option<String>> {
        self.inner.receiver_name(receiver).await
    }

    async fn list_receivers(&self) -> anyhow::Result<Vec<UserId>> {
        self.inner.list_receivers().await
    }

    async fn create_notice(&self, draft: NoticeDraft, receivers: &[UserId]) -> anyhow::Result<Notice> {
        self.check()?;
        self.inner.create_notice(draft, receivers).await
    }

    async fn get_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>> {
        self.inner.get_delivery(key).await
    }

    async fn find_views(&self, receiver: UserId, filter: StatusFilter) -> anyhow::Result<Vec<NoticeView>> {
        self.inner.find_views(receiver, filter).await
    }

    async fn count_unread(&self, receiver: UserId) -> anyhow::Result<u64> {
        self.inner.count_unread(receiver).await
    }

    async fn advance_status(
        &self,
        receiver: UserId,
        scope: AdvanceScope<'_>,
        to: DeliveryStatus,
    ) -> anyhow::Result<Vec<DeliveryRecord>> {
        self.check()?;
        self.inner.advance_status(receiver, scope, to).await
    }

    async fn delete_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>> {
        self.check()?;
        self.inner.delete_delivery(key).await
    }
}

struct Harness {
    hub: NotificationHub,
    store: Arc<FlakyStore>,
    backend: Arc<RecordingBackend>,
}

async fn harness() -> Harness {
    let store = Arc::new(FlakyStore::default());
    store.upsert_receiver(ALICE, "Alice").await.unwrap();
    store.upsert_receiver(BOB, "Bob").await.unwrap();
    let backend = Arc::new(RecordingBackend::default());
    let hub = NotificationHub::new(
        CourierConfig::default(),
        store.clone(),
        backend.clone(),
        Arc::new(ConnectionRegistry::new()),
    );
    Harness {
        hub,
        store,
        backend,
    }
}

async fn assign(hub: &NotificationHub, task: u64) -> NoticeId {
    hub.notices()
        .notify(&NoticeEvent::task_assigned(ALICE, BOB, task, "Quarterly report"))
        .await
        .unwrap()
        .unwrap()
        .notice_id
}

async fn status(store: &FlakyStore, notice_id: NoticeId) -> DeliveryStatus {
    store
        .get_delivery(DeliveryKey::new(notice_id, BOB))
        .await
        .unwrap()
        .unwrap()
        .status
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_receiver_gets_one_record_and_cached_count() {
    let h = harness().await;
    let notice_id = assign(&h.hub, 10).await;

    let all = h.hub.notices().get_all_notices(BOB).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].notice_id, notice_id);
    assert_eq!(status(&h.store, notice_id).await, DeliveryStatus::NotReceived);
    assert_eq!(h.hub.cache().get_unread(BOB).await, Some(1));
    assert_eq!(h.hub.cache().pending_count(BOB).await, 1);
}

#[tokio::test]
async fn reconnect_advances_pending_and_clears_queue() {
    let h = harness().await;
    let notice_id = assign(&h.hub, 11).await;

    let (sink, mut rx) = ChannelSink::channel(16);
    let registration = h.hub.open_stream(BOB, Box::new(sink)).await.unwrap();
    registration.reconcile.unwrap().await.unwrap();

    assert_eq!(status(&h.store, notice_id).await, DeliveryStatus::NotViewed);
    assert_eq!(h.hub.cache().pending_count(BOB).await, 0);

    assert_eq!(
        rx.recv().await,
        Some(OutboundMessage::Event(ServerEvent::connected()))
    );
    match rx.recv().await {
        Some(OutboundMessage::Event(ServerEvent::Notification { payload })) => {
            assert_eq!(payload.notice_id, notice_id);
            assert_eq!(payload.status, DeliveryStatus::NotViewed);
        }
        other => panic!("expected replayed notice, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_push_evicts_and_notice_stays_readable() {
    let h = harness().await;
    let (sink, rx) = ChannelSink::channel(16);
    let _id = h.hub.registry().register(BOB, Box::new(sink));
    drop(rx);

    let notice_id = assign(&h.hub, 12).await;

    assert!(!h.hub.registry().is_online(BOB));
    let unread = h.hub.notices().get_unread_notices(BOB).await.unwrap();
    assert!(unread.iter().any(|view| view.notice_id == notice_id));
    assert_eq!(h.hub.cache().pending_count(BOB).await, 1);
}

#[tokio::test]
async fn full_outbound_channel_counts_as_transport_failure() {
    let h = harness().await;
    let (sink, _rx) = ChannelSink::channel(1);
    let _id = h.hub.registry().register(BOB, Box::new(sink));
    assert!(h.hub.registry().push(BOB, &ServerEvent::Heartbeat).is_delivered());

    let notice_id = assign(&h.hub, 13).await;

    assert!(!h.hub.registry().is_online(BOB));
    assert_eq!(status(&h.store, notice_id).await, DeliveryStatus::NotReceived);
}

#[tokio::test]
async fn mark_as_read_twice_decrements_once() {
    let h = harness().await;
    let notice_id = assign(&h.hub, 14).await;
    let before = h.backend.decrements();

    assert!(h.hub.notices().mark_as_read(BOB, notice_id).await.unwrap());
    assert!(!h.hub.notices().mark_as_read(BOB, notice_id).await.unwrap());

    assert_eq!(h.backend.decrements() - before, 1);
    assert_eq!(status(&h.store, notice_id).await, DeliveryStatus::Viewed);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconciliation_twice_is_idempotent() {
    let h = harness().await;
    let notice_id = assign(&h.hub, 15).await;

    let first = h.hub.reconciler().run(BOB).await.unwrap();
    let second = h.hub.reconciler().run(BOB).await.unwrap();

    assert_eq!(first.advanced.len(), 1);
    assert!(second.advanced.is_empty());
    assert_eq!(second.source, ReconcileSource::Nothing);
    assert_eq!(status(&h.store, notice_id).await, DeliveryStatus::NotViewed);
}

#[tokio::test]
async fn mark_all_as_read_leaves_nothing_unread() {
    let h = harness().await;
    for task in 0..4 {
        assign(&h.hub, task).await;
    }
    // Warm the recent-notices cache so the call below has to invalidate it.
    assert_eq!(h.hub.notices().get_unread_notices(BOB).await.unwrap().len(), 4);

    h.hub.notices().mark_all_as_read(BOB).await.unwrap();

    let unread = h.hub.notices().get_unread_notices(BOB).await.unwrap();
    assert!(unread.iter().all(|view| view.status == DeliveryStatus::Viewed));
    assert!(unread.is_empty());
}

#[tokio::test]
async fn self_notification_writes_nothing() {
    let h = harness().await;
    let report = h
        .hub
        .notices()
        .notify(&NoticeEvent::task_updated(BOB, BOB, 1, "Own task"))
        .await
        .unwrap();

    assert!(report.is_none());
    assert!(h.hub.notices().get_all_notices(BOB).await.unwrap().is_empty());
    assert_eq!(h.backend.writes(), 0);
}

#[tokio::test]
async fn durable_failure_propagates_before_cache_writes() {
    let h = harness().await;
    h.store.failing.store(true, Ordering::SeqCst);

    let err = h
        .hub
        .notices()
        .notify(&NoticeEvent::task_assigned(ALICE, BOB, 1, "Never stored"))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Store(_)));
    assert_eq!(h.backend.writes(), 0);

    h.store.failing.store(false, Ordering::SeqCst);
    let notice_id = assign(&h.hub, 2).await;
    let writes = h.backend.writes();
    h.store.failing.store(true, Ordering::SeqCst);

    assert!(h.hub.notices().mark_as_read(BOB, notice_id).await.is_err());
    assert!(h.hub.notices().delete_notice(BOB, notice_id).await.is_err());
    assert_eq!(h.backend.writes(), writes);
}

#[tokio::test]
async fn newer_stream_replaces_older_one() {
    let h = harness().await;
    let (first, mut first_rx) = ChannelSink::channel(8);
    let (second, mut second_rx) = ChannelSink::channel(8);

    let one = h.hub.open_stream(BOB, Box::new(first)).await.unwrap();
    let two = h.hub.open_stream(BOB, Box::new(second)).await.unwrap();
    assert_ne!(one.connection_id, two.connection_id);

    assert_eq!(
        first_rx.recv().await,
        Some(OutboundMessage::Event(ServerEvent::connected()))
    );
    assert!(matches!(first_rx.recv().await, Some(OutboundMessage::Close(Some(_)))));
    assert_eq!(
        second_rx.recv().await,
        Some(OutboundMessage::Event(ServerEvent::connected()))
    );

    assert!(!h.hub.registry().deregister(BOB, one.connection_id));
    assert!(h.hub.registry().is_online(BOB));
}
