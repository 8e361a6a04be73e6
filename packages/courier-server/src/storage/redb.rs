//! Embedded [`DeliveryStore`] backed by a single `redb` file.
//!
//! Tables:
//! - `notices`: notice id -> named `MsgPack` [`Notice`]
//! - `deliveries`: (receiver, notice id) -> status code
//! - `receivers`: receiver id -> display name
//! - `meta`: counters (last assigned notice id)
//!
//! `redb` is synchronous, so every call runs on the blocking pool. Each
//! mutating operation is one write transaction: it commits fully or not at all.

use std::path::Path;
use std::sync::Arc;

use ::redb::{Database, ReadableTable, TableDefinition};
use anyhow::Context;
use async_trait::async_trait;
use courier_core::{
    DeliveryKey, DeliveryRecord, DeliveryStatus, Notice, NoticeDraft, NoticeId, NoticeView, UserId,
};

use super::sort_newest_first;
use crate::traits::{AdvanceScope, DeliveryStore, StatusFilter};

const NOTICES: TableDefinition<u64, &[u8]> = TableDefinition::new("notices");
const DELIVERIES: TableDefinition<(u64, u64), u8> = TableDefinition::new("deliveries");
const RECEIVERS: TableDefinition<u64, &str> = TableDefinition::new("receivers");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const LAST_NOTICE_ID: &str = "last_notice_id";

fn decode_status(code: u8) -> anyhow::Result<DeliveryStatus> {
    DeliveryStatus::from_code(code).with_context(|| format!("unknown delivery status code {code}"))
}

/// `redb`-backed delivery store.
pub struct RedbDeliveryStore {
    db: Arc<Database>,
}

impl RedbDeliveryStore {
    /// Opens (or creates) the database file at `path` and ensures all tables exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a valid database.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("opening delivery store at {}", path.display()))?;
        create_tables(&db)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

fn create_tables(db: &Database) -> anyhow::Result<()> {
    let txn = db.begin_write()?;
    {
        txn.open_table(NOTICES)?;
        txn.open_table(DELIVERIES)?;
        txn.open_table(RECEIVERS)?;
        txn.open_table(META)?;
    }
    txn.commit()?;
    Ok(())
}

#[async_trait]
impl DeliveryStore for RedbDeliveryStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.blocking(create_tables).await
    }

    async fn upsert_receiver(&self, receiver: UserId, name: &str) -> anyhow::Result<()> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(RECEIVERS)?;
                table.insert(receiver.0, name.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn receiver_exists(&self, receiver: UserId) -> anyhow::Result<bool> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECEIVERS)?;
            Ok(table.get(receiver.0)?.is_some())
        })
        .await
    }

    async fn receiver_name(&self, receiver: UserId) -> anyhow::Result<Option<String>> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECEIVERS)?;
            Ok(table.get(receiver.0)?.map(|name| name.value().to_string()))
        })
        .await
    }

    async fn list_receivers(&self) -> anyhow::Result<Vec<UserId>> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(RECEIVERS)?;
            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (id, _) = entry?;
                ids.push(UserId(id.value()));
            }
            Ok(ids)
        })
        .await
    }

    async fn create_notice(
        &self,
        draft: NoticeDraft,
        receivers: &[UserId],
    ) -> anyhow::Result<Notice> {
        anyhow::ensure!(!receivers.is_empty(), "a notice needs at least one receiver");
        let receivers = receivers.to_vec();

        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let notice = {
                let mut meta = txn.open_table(META)?;
                let last = meta.get(LAST_NOTICE_ID)?.map_or(0, |v| v.value());
                let notice = draft.into_notice(NoticeId(last + 1));
                meta.insert(LAST_NOTICE_ID, notice.id.0)?;

                let bytes = rmp_serde::to_vec_named(&notice)?;
                txn.open_table(NOTICES)?
                    .insert(notice.id.0, bytes.as_slice())?;

                let mut deliveries = txn.open_table(DELIVERIES)?;
                for receiver in &receivers {
                    deliveries.insert((receiver.0, notice.id.0), DeliveryStatus::NotReceived.code())?;
                }
                notice
            };
            txn.commit()?;
            Ok(notice)
        })
        .await
    }

    async fn get_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(DELIVERIES)?;
            let Some(code) = table.get((key.receiver.0, key.notice_id.0))?.map(|v| v.value())
            else {
                return Ok(None);
            };
            Ok(Some(DeliveryRecord {
                notice_id: key.notice_id,
                receiver: key.receiver,
                status: decode_status(code)?,
            }))
        })
        .await
    }

    async fn find_views(
        &self,
        receiver: UserId,
        filter: StatusFilter,
    ) -> anyhow::Result<Vec<NoticeView>> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let deliveries = txn.open_table(DELIVERIES)?;
            let notices = txn.open_table(NOTICES)?;
            let receivers = txn.open_table(RECEIVERS)?;

            let mut views = Vec::new();
            for entry in deliveries.range((receiver.0, 0u64)..=(receiver.0, u64::MAX))? {
                let (key, code) = entry?;
                let status = decode_status(code.value())?;
                if !filter.matches(status) {
                    continue;
                }
                let (_, notice_id) = key.value();
                let Some(bytes) = notices.get(notice_id)? else {
                    tracing::warn!(notice_id, receiver_id = %receiver, "delivery without notice");
                    continue;
                };
                let notice: Notice = rmp_serde::from_slice(bytes.value())?;
                let sender_name = receivers
                    .get(notice.sender.0)?
                    .map(|name| name.value().to_string());
                views.push(NoticeView::project(&notice, status, sender_name));
            }
            sort_newest_first(&mut views);
            Ok(views)
        })
        .await
    }

    async fn count_unread(&self, receiver: UserId) -> anyhow::Result<u64> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(DELIVERIES)?;
            let mut count = 0;
            for entry in table.range((receiver.0, 0u64)..=(receiver.0, u64::MAX))? {
                let (_, code) = entry?;
                if decode_status(code.value())?.is_unread() {
                    count += 1;
                }
            }
            Ok(count)
        })
        .await
    }

    async fn advance_status(
        &self,
        receiver: UserId,
        scope: AdvanceScope<'_>,
        to: DeliveryStatus,
    ) -> anyhow::Result<Vec<DeliveryRecord>> {
        let only: Option<Vec<u64>> = match scope {
            AdvanceScope::Notices(ids) => Some(ids.iter().map(|id| id.0).collect()),
            AdvanceScope::All => None,
        };

        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let changed = {
                let mut table = txn.open_table(DELIVERIES)?;
                let candidates = match only {
                    Some(ids) => ids,
                    None => {
                        let mut ids = Vec::new();
                        for entry in table.range((receiver.0, 0u64)..=(receiver.0, u64::MAX))? {
                            let (key, _) = entry?;
                            ids.push(key.value().1);
                        }
                        ids
                    }
                };

                let mut changed = Vec::new();
                for notice_id in candidates {
                    let Some(code) = table.get((receiver.0, notice_id))?.map(|v| v.value()) else {
                        continue;
                    };
                    let status = decode_status(code)?;
                    if status.can_advance_to(to) {
                        table.insert((receiver.0, notice_id), to.code())?;
                        changed.push(DeliveryRecord {
                            notice_id: NoticeId(notice_id),
                            receiver,
                            status,
                        });
                    }
                }
                changed
            };
            txn.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn delete_delivery(&self, key: DeliveryKey) -> anyhow::Result<Option<DeliveryRecord>> {
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let removed = txn
                .open_table(DELIVERIES)?
                .remove((key.receiver.0, key.notice_id.0))?
                .map(|v| v.value());
            txn.commit()?;
            removed
                .map(|code| {
                    Ok(DeliveryRecord {
                        notice_id: key.notice_id,
                        receiver: key.receiver,
                        status: decode_status(code)?,
                    })
                })
                .transpose()
        })
        .await
    }
}
