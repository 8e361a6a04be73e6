//! Courier Core: notice data model, delivery status machine, and wire events.

pub mod event;
pub mod messages;
pub mod types;

pub use event::{fanout_targets, Audience, NoticeEvent};
pub use messages::ServerEvent;
pub use types::{
    now_millis, DeliveryKey, DeliveryRecord, DeliveryStatus, Notice, NoticeDraft, NoticeId,
    NoticeType, NoticeView, UnreadStatus, UserId,
};
