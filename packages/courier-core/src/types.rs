//! Notice and delivery data model.
//!
//! A [`Notice`] is the immutable record of something that happened. Each
//! intended receiver gets one [`DeliveryRecord`] keyed by
//! `(notice_id, receiver)`, carrying a [`DeliveryStatus`] that only ever
//! moves forward. [`NoticeView`] is the per-receiver projection that is
//! cached, queued for offline replay, and pushed to live connections.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a user that can send or receive notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a notice, assigned by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoticeId(pub u64);

impl fmt::Display for NoticeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

/// Per-receiver delivery status of a notice.
///
/// State machine: `NotReceived -> NotViewed -> Viewed`. Transitions are
/// forward-only; a record can also be deleted from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Created, but the receiver has not been reached yet.
    NotReceived,
    /// Delivered to the receiver, not opened.
    NotViewed,
    /// Opened by the receiver. Terminal.
    Viewed,
}

impl DeliveryStatus {
    const fn rank(self) -> u8 {
        match self {
            Self::NotReceived => 0,
            Self::NotViewed => 1,
            Self::Viewed => 2,
        }
    }

    /// Numeric code used by existing clients and on disk.
    ///
    /// The codes predate the three-state model, so they do not follow the
    /// lifecycle order: `NotViewed = 0`, `Viewed = 1`, `NotReceived = 2`.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::NotViewed => 0,
            Self::Viewed => 1,
            Self::NotReceived => 2,
        }
    }

    /// Decodes a numeric status code. Returns `None` for unknown codes.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NotViewed),
            1 => Some(Self::Viewed),
            2 => Some(Self::NotReceived),
            _ => None,
        }
    }

    /// Whether a record in this status counts towards the unread total.
    #[must_use]
    pub const fn is_unread(self) -> bool {
        !matches!(self, Self::Viewed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Staying in the same state is not a transition and returns `false`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

// ---------------------------------------------------------------------------
// NoticeType
// ---------------------------------------------------------------------------

/// Category of the domain event a notice was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeType {
    /// A task was assigned to the receiver.
    NewTask,
    /// A task owned by the receiver changed state.
    TaskUpdate,
    /// Company-wide announcement.
    CompanyMatter,
    /// Anything else.
    Custom,
}

impl NoticeType {
    /// Numeric code of this type.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::NewTask => 1,
            Self::TaskUpdate => 2,
            Self::CompanyMatter => 3,
            Self::Custom => 4,
        }
    }

    /// Decodes a numeric type code. Unknown codes map to [`NoticeType::Custom`].
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::NewTask,
            2 => Self::TaskUpdate,
            3 => Self::CompanyMatter,
            _ => Self::Custom,
        }
    }
}

// ---------------------------------------------------------------------------
// Notice / DeliveryRecord
// ---------------------------------------------------------------------------

/// Fields of a notice before the durable store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeDraft {
    pub sender: UserId,
    pub notice_type: NoticeType,
    pub content: String,
    pub related_id: Option<u64>,
    pub created_at: i64,
}

impl NoticeDraft {
    /// Attaches the store-assigned id, producing the immutable [`Notice`].
    #[must_use]
    pub fn into_notice(self, id: NoticeId) -> Notice {
        Notice {
            id,
            sender: self.sender,
            notice_type: self.notice_type,
            content: self.content,
            related_id: self.related_id,
            created_at: self.created_at,
        }
    }
}

/// Immutable record of an event, authored by a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: NoticeId,
    pub sender: UserId,
    pub notice_type: NoticeType,
    pub content: String,
    /// Id of the domain object (task, matter) that produced the notice.
    pub related_id: Option<u64>,
    /// Creation time, millis since epoch.
    pub created_at: i64,
}

/// Composite key of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryKey {
    pub notice_id: NoticeId,
    pub receiver: UserId,
}

impl DeliveryKey {
    #[must_use]
    pub const fn new(notice_id: NoticeId, receiver: UserId) -> Self {
        Self {
            notice_id,
            receiver,
        }
    }
}

/// Per-receiver fan-out of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub notice_id: NoticeId,
    pub receiver: UserId,
    pub status: DeliveryStatus,
}

impl DeliveryRecord {
    #[must_use]
    pub const fn key(&self) -> DeliveryKey {
        DeliveryKey::new(self.notice_id, self.receiver)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A notice as seen by one receiver: the notice joined with its delivery status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeView {
    pub notice_id: NoticeId,
    pub notice_type: NoticeType,
    pub content: String,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub created_at: i64,
    pub related_id: Option<u64>,
    pub status: DeliveryStatus,
}

impl NoticeView {
    /// Joins a notice with a receiver's delivery status.
    #[must_use]
    pub fn project(notice: &Notice, status: DeliveryStatus, sender_name: Option<String>) -> Self {
        Self {
            notice_id: notice.id,
            notice_type: notice.notice_type,
            content: notice.content.clone(),
            sender_id: notice.sender,
            sender_name,
            created_at: notice.created_at,
            related_id: notice.related_id,
            status,
        }
    }
}

/// Scalar unread summary for a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadStatus {
    pub has_unread: bool,
    pub unread_count: u64,
}

impl UnreadStatus {
    #[must_use]
    pub const fn from_count(unread_count: u64) -> Self {
        Self {
            has_unread: unread_count > 0,
            unread_count,
        }
    }
}
