//! Inbound domain events that produce notices.
//!
//! Business rules (task assignment, company announcements, ...) describe what
//! happened as a [`NoticeEvent`]; the fanout service turns it into one notice
//! and one delivery record per resolved receiver.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{now_millis, NoticeDraft, NoticeType, UserId};

/// Who should receive a notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Audience {
    /// An explicit list of receivers. Duplicates are ignored.
    Receivers(Vec<UserId>),
    /// Every receiver known to the durable store.
    Everyone,
}

/// A domain event that should be announced to an audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeEvent {
    pub sender: UserId,
    pub notice_type: NoticeType,
    pub content: String,
    pub related_id: Option<u64>,
    pub audience: Audience,
}

impl NoticeEvent {
    #[must_use]
    pub fn new(
        sender: UserId,
        notice_type: NoticeType,
        content: impl Into<String>,
        audience: Audience,
    ) -> Self {
        Self {
            sender,
            notice_type,
            content: content.into(),
            related_id: None,
            audience,
        }
    }

    /// Links the notice to the domain object that produced it.
    #[must_use]
    pub fn with_related(mut self, related_id: u64) -> Self {
        self.related_id = Some(related_id);
        self
    }

    /// A task was assigned to `assignee` by `assigner`.
    #[must_use]
    pub fn task_assigned(assigner: UserId, assignee: UserId, task_id: u64, title: &str) -> Self {
        Self::new(
            assigner,
            NoticeType::NewTask,
            format!("You have been assigned a task: {title}"),
            Audience::Receivers(vec![assignee]),
        )
        .with_related(task_id)
    }

    /// `updater` changed the state of a task owned by `assignee`.
    #[must_use]
    pub fn task_updated(updater: UserId, assignee: UserId, task_id: u64, title: &str) -> Self {
        Self::new(
            updater,
            NoticeType::TaskUpdate,
            format!("The status of your task '{title}' was updated"),
            Audience::Receivers(vec![assignee]),
        )
        .with_related(task_id)
    }

    /// Company-wide announcement of a new matter.
    #[must_use]
    pub fn company_matter(sender: UserId, matter_id: u64, title: &str) -> Self {
        Self::new(
            sender,
            NoticeType::CompanyMatter,
            format!("New company matter: {title}"),
            Audience::Everyone,
        )
        .with_related(matter_id)
    }

    /// Company-wide announcement of an important task.
    #[must_use]
    pub fn important_task(sender: UserId, task_id: u64, title: &str) -> Self {
        Self::new(
            sender,
            NoticeType::NewTask,
            format!("A new important task was published: '{title}'"),
            Audience::Everyone,
        )
        .with_related(task_id)
    }

    /// Builds the notice fields, stamped with the current time.
    #[must_use]
    pub fn draft(&self) -> NoticeDraft {
        NoticeDraft {
            sender: self.sender,
            notice_type: self.notice_type,
            content: self.content.clone(),
            related_id: self.related_id,
            created_at: now_millis(),
        }
    }
}

/// Filters candidate receivers down to the actual fanout targets.
///
/// Removes the sender (nobody is notified about their own action) and
/// duplicates, preserving first-seen order.
#[must_use]
pub fn fanout_targets(sender: UserId, candidates: &[UserId]) -> Vec<UserId> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .iter()
        .copied()
        .filter(|id| *id != sender && seen.insert(*id))
        .collect()
}
