use async_trait::async_trait;
use courier_core::{
    DeliveryKey, DeliveryRecord, DeliveryStatus, Notice, NoticeDraft, NoticeId, NoticeView,
    ServerEvent, UserId,
};

use crate::network::connection::{ConnectionId, EventSink, HeartbeatReport, PushOutcome};

/// Which of a receiver's delivery records a query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Every record regardless of status.
    Any,
    /// Records that are not yet `Viewed`.
    Unread,
    /// Records in exactly this status.
    Only(DeliveryStatus),
}

impl StatusFilter {
    #[must_use]
    pub fn matches(self, status: DeliveryStatus) -> bool {
        match self {
            Self::Any => true,
            Self::Unread => status.is_unread(),
            Self::Only(wanted) => wanted == status,
        }
    }
}

/// Which of a receiver's delivery records an advance should consider.
#[derive(Debug, Clone, Copy)]
pub enum AdvanceScope<'a> {
    /// Only records for these notices.
    Notices(&'a [NoticeId]),
    /// Every record of the receiver.
    All,
}

/// System of record for notices, delivery records, and known receivers.
/// Implementations: in-memory (tests, embedding), `redb` (single node).
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// One-time initialization (e.g., create tables).
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Adds a receiver to the directory, or renames an existing one.
    async fn upsert_receiver(&self, receiver: UserId, name: &str) -> anyhow::Result<()>;

    async fn receiver_exists(&self, receiver: UserId) -> anyhow::Result<bool>;

    /// Display name of a receiver, if known.
    async fn receiver_name(&self, receiver: UserId) -> anyhow::Result<Option<String>>;

    /// Every receiver in the directory, in id order.
    async fn list_receivers(&self) -> anyhow::Result<Vec<UserId>>;

    /// Persists one notice and a `NotReceived` delivery record per receiver
    /// in a single write. Either everything is stored or nothing is.
    async fn create_notice(
        &self,
        draft: NoticeDraft,
        receivers: &[UserId],
    ) -> anyhow::Result<Notice>;

    async fn get_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>>;

    /// Views of a receiver's notices, newest first (creation time, then id).
    async fn find_views(
        &self,
        receiver: UserId,
        filter: StatusFilter,
    ) -> anyhow::Result<Vec<NoticeView>>;

    async fn count_unread(&self, receiver: UserId) -> anyhow::Result<u64>;

    /// Moves every record in `scope` that can legally advance to `to`, in a
    /// single transaction.
    ///
    /// Returns the records that changed, carrying their status *before* the
    /// change. Records that cannot advance are left untouched and omitted.
    async fn advance_status(
        &self,
        receiver: UserId,
        scope: AdvanceScope<'_>,
        to: DeliveryStatus,
    ) -> anyhow::Result<Vec<DeliveryRecord>>;

    /// Removes one delivery record, returning it as it was before removal.
    async fn delete_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>>;
}

/// Process-local registry of live receiver connections.
///
/// Writes are synchronous and never block on a slow client: a sink that
/// cannot accept a frame is evicted. Swap the implementation to coordinate
/// connections across processes.
pub trait LiveRegistry: Send + Sync {
    /// Registers a sink for `receiver`, replacing and closing any previous one.
    fn register(&self, receiver: UserId, sink: Box<dyn EventSink>) -> ConnectionId;

    /// Removes `receiver`'s entry only if it still belongs to `connection`.
    fn deregister(&self, receiver: UserId, connection: ConnectionId) -> bool;

    /// Writes `event` to `receiver`'s connection, evicting it on failure.
    fn push(&self, receiver: UserId, event: &ServerEvent) -> PushOutcome;

    /// Writes a keep-alive frame to every connection.
    fn heartbeat(&self) -> HeartbeatReport;

    /// Closes and removes `receiver`'s connection. Returns whether one existed.
    fn close(&self, receiver: UserId, reason: Option<&str>) -> bool;

    fn online_count(&self) -> usize;

    fn online_ids(&self) -> Vec<UserId>;

    fn is_online(&self, receiver: UserId) -> bool;

    /// Closes and removes every connection, returning how many there were.
    fn drain_all(&self) -> usize;
}
