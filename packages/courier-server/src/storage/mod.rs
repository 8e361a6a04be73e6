//! Durable store implementations.
//!
//! - [`MemoryDeliveryStore`]: volatile, for tests and embedding
//! - [`RedbDeliveryStore`]: embedded single-file store (`redb` feature)
//!
//! Both implement [`DeliveryStore`](crate::traits::DeliveryStore).

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryDeliveryStore;
#[cfg(feature = "redb")]
pub use self::redb::RedbDeliveryStore;

use courier_core::NoticeView;

/// Orders views newest first: creation time descending, then id descending.
pub(crate) fn sort_newest_first(views: &mut [NoticeView]) {
    views.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.notice_id.cmp(&a.notice_id))
    });
}
