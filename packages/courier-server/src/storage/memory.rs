//! In-memory [`DeliveryStore`] implementation.
//!
//! Keeps every table in one `parking_lot::RwLock`, so multi-row writes
//! (`create_notice`, `advance_status`) are atomic with respect to readers.
//! Suitable for tests and embedding; nothing survives a restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use courier_core::{
    DeliveryKey, DeliveryRecord, DeliveryStatus, Notice, NoticeDraft, NoticeId, NoticeView, UserId,
};
use parking_lot::RwLock;

use super::sort_newest_first;
use crate::traits::{AdvanceScope, DeliveryStore, StatusFilter};

#[derive(Default)]
struct State {
    notices: HashMap<NoticeId, Notice>,
    /// Keyed receiver-first so one receiver's records form a contiguous range.
    deliveries: BTreeMap<(UserId, NoticeId), DeliveryStatus>,
    receivers: BTreeMap<UserId, String>,
    last_id: u64,
}

impl State {
    fn receiver_range(
        &self,
        receiver: UserId,
    ) -> impl Iterator<Item = (NoticeId, DeliveryStatus)> + '_ {
        self.deliveries
            .range((receiver, NoticeId(0))..=(receiver, NoticeId(u64::MAX)))
            .map(|(&(_, notice_id), &status)| (notice_id, status))
    }
}

/// Volatile delivery store.
pub struct MemoryDeliveryStore {
    state: RwLock<State>,
}

impl MemoryDeliveryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Number of notices stored, across all receivers.
    #[must_use]
    pub fn notice_count(&self) -> usize {
        self.state.read().notices.len()
    }

    /// Number of delivery records stored, across all receivers.
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.state.read().deliveries.len()
    }
}

impl Default for MemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert_receiver(&self, receiver: UserId, name: &str) -> anyhow::Result<()> {
        self.state.write().receivers.insert(receiver, name.to_string());
        Ok(())
    }

    async fn receiver_exists(&self, receiver: UserId) -> anyhow::Result<bool> {
        Ok(self.state.read().receivers.contains_key(&receiver))
    }

    async fn receiver_name(&self, receiver: UserId) -> anyhow::Result<Option<String>> {
        Ok(self.state.read().receivers.get(&receiver).cloned())
    }

    async fn list_receivers(&self) -> anyhow::Result<Vec<UserId>> {
        Ok(self.state.read().receivers.keys().copied().collect())
    }

    async fn create_notice(
        &self,
        draft: NoticeDraft,
        receivers: &[UserId],
    ) -> anyhow::Result<Notice> {
        anyhow::ensure!(!receivers.is_empty(), "a notice needs at least one receiver");

        let mut state = self.state.write();
        state.last_id += 1;
        let notice = draft.into_notice(NoticeId(state.last_id));
        for receiver in receivers {
            state
                .deliveries
                .insert((*receiver, notice.id), DeliveryStatus::NotReceived);
        }
        state.notices.insert(notice.id, notice.clone());
        Ok(notice)
    }

    async fn get_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>> {
        let state = self.state.read();
        Ok(state
            .deliveries
            .get(&(key.receiver, key.notice_id))
            .map(|&status| DeliveryRecord {
                notice_id: key.notice_id,
                receiver: key.receiver,
                status,
            }))
    }

    async fn find_views(
        &self,
        receiver: UserId,
        filter: StatusFilter,
    ) -> anyhow::Result<Vec<NoticeView>> {
        let state = self.state.read();
        let mut views: Vec<NoticeView> = state
            .receiver_range(receiver)
            .filter(|(_, status)| filter.matches(*status))
            .filter_map(|(notice_id, status)| {
                let notice = state.notices.get(&notice_id)?;
                let sender_name = state.receivers.get(&notice.sender).cloned();
                Some(NoticeView::project(notice, status, sender_name))
            })
            .collect();
        sort_newest_first(&mut views);
        Ok(views)
    }

    async fn count_unread(&self, receiver: UserId) -> anyhow::Result<u64> {
        let state = self.state.read();
        Ok(state
            .receiver_range(receiver)
            .filter(|(_, status)| status.is_unread())
            .count() as u64)
    }

    async fn advance_status(
        &self,
        receiver: UserId,
        scope: AdvanceScope<'_>,
        to: DeliveryStatus,
    ) -> anyhow::Result<Vec<DeliveryRecord>> {
        let mut state = self.state.write();
        let candidates: Vec<NoticeId> = match scope {
            AdvanceScope::Notices(ids) => ids.to_vec(),
            AdvanceScope::All => state.receiver_range(receiver).map(|(id, _)| id).collect(),
        };

        let mut changed = Vec::new();
        for notice_id in candidates {
            if let Some(status) = state.deliveries.get_mut(&(receiver, notice_id)) {
                if status.can_advance_to(to) {
                    changed.push(DeliveryRecord {
                        notice_id,
                        receiver,
                        status: *status,
                    });
                    *status = to;
                }
            }
        }
        Ok(changed)
    }

    async fn delete_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>> {
        let mut state = self.state.write();
        Ok(state
            .deliveries
            .remove(&(key.receiver, key.notice_id))
            .map(|status| DeliveryRecord {
                notice_id: key.notice_id,
                receiver: key.receiver,
                status,
            }))
    }
}

#[cfg(test)]
mod tests {
    use courier_core::NoticeType;

    use super::*;

    fn draft(sender: u64, created_at: i64) -> NoticeDraft {
        NoticeDraft {
            sender: UserId(sender),
            notice_type: NoticeType::NewTask,
            content: format!("notice at {created_at}"),
            related_id: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn create_notice_inserts_not_received_records() {
        let store = MemoryDeliveryStore::new();
        let notice = store
            .create_notice(draft(1, 10), &[UserId(2), UserId(3)])
            .await
            .unwrap();

        assert_eq!(notice.id, NoticeId(1));
        assert_eq!(store.notice_count(), 1);
        assert_eq!(store.delivery_count(), 2);

        let record = store
            .get_delivery(DeliveryKey::new(notice.id, UserId(3)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, DeliveryStatus::NotReceived);
    }

    #[tokio::test]
    async fn create_notice_rejects_empty_receivers() {
        let store = MemoryDeliveryStore::new();
        assert!(store.create_notice(draft(1, 10), &[]).await.is_err());
        assert_eq!(store.notice_count(), 0);
    }

    #[tokio::test]
    async fn find_views_newest_first_with_sender_name() {
        let store = MemoryDeliveryStore::new();
        store.upsert_receiver(UserId(1), "Ada").await.unwrap();
        let older = store.create_notice(draft(1, 10), &[UserId(2)]).await.unwrap();
        let newer = store.create_notice(draft(1, 20), &[UserId(2)]).await.unwrap();
        let same_time = store.create_notice(draft(1, 20), &[UserId(2)]).await.unwrap();

        let views = store.find_views(UserId(2), StatusFilter::Any).await.unwrap();
        let ids: Vec<_> = views.iter().map(|v| v.notice_id).collect();
        assert_eq!(ids, vec![same_time.id, newer.id, older.id]);
        assert_eq!(views[0].sender_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn advance_status_only_moves_forward() {
        let store = MemoryDeliveryStore::new();
        let a = store.create_notice(draft(1, 10), &[UserId(2)]).await.unwrap();
        let b = store.create_notice(draft(1, 11), &[UserId(2)]).await.unwrap();

        let viewed = store
            .advance_status(UserId(2), AdvanceScope::Notices(&[a.id]), DeliveryStatus::Viewed)
            .await
            .unwrap();
        assert_eq!(viewed.len(), 1);
        assert_eq!(viewed[0].status, DeliveryStatus::NotReceived);

        let moved = store
            .advance_status(UserId(2), AdvanceScope::All, DeliveryStatus::NotViewed)
            .await
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].notice_id, b.id);

        let a_now = store
            .get_delivery(DeliveryKey::new(a.id, UserId(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a_now.status, DeliveryStatus::Viewed);
        assert_eq!(store.count_unread(UserId(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn advance_scope_all_is_per_receiver() {
        let store = MemoryDeliveryStore::new();
        store
            .create_notice(draft(1, 10), &[UserId(2), UserId(3)])
            .await
            .unwrap();

        store
            .advance_status(UserId(2), AdvanceScope::All, DeliveryStatus::Viewed)
            .await
            .unwrap();

        assert_eq!(store.count_unread(UserId(2)).await.unwrap(), 0);
        assert_eq!(store.count_unread(UserId(3)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_delivery_returns_previous_record() {
        let store = MemoryDeliveryStore::new();
        let notice = store.create_notice(draft(1, 10), &[UserId(2)]).await.unwrap();
        let key = DeliveryKey::new(notice.id, UserId(2));

        let removed = store.delete_delivery(key).await.unwrap().unwrap();
        assert_eq!(removed.status, DeliveryStatus::NotReceived);
        assert!(store.delete_delivery(key).await.unwrap().is_none());
        assert!(store
            .find_views(UserId(2), StatusFilter::Any)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn receiver_directory() {
        let store = MemoryDeliveryStore::new();
        store.upsert_receiver(UserId(5), "Eve").await.unwrap();
        store.upsert_receiver(UserId(2), "Bob").await.unwrap();
        store.upsert_receiver(UserId(5), "Eve Smith").await.unwrap();

        assert!(store.receiver_exists(UserId(2)).await.unwrap());
        assert!(!store.receiver_exists(UserId(9)).await.unwrap());
        assert_eq!(
            store.receiver_name(UserId(5)).await.unwrap().as_deref(),
            Some("Eve Smith")
        );
        assert_eq!(
            store.list_receivers().await.unwrap(),
            vec![UserId(2), UserId(5)]
        );
    }
}
