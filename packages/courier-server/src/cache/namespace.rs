//! Typed cache key namespaces.
//!
//! Every namespace owns a key prefix and exactly one value type, so a key
//! can never be read back as something it was not written as.

use std::fmt::Display;

use courier_core::{NoticeView, UserId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::backend::CacheError;

/// A key prefix bound to the type stored under it.
pub trait CacheNamespace {
    const PREFIX: &'static str;
    type Value;

    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the value cannot be encoded.
    fn encode(value: &Self::Value) -> Result<Vec<u8>, CacheError>;

    /// # Errors
    ///
    /// Returns [`CacheError::Codec`] if the bytes are not a valid value.
    fn decode(bytes: &[u8]) -> Result<Self::Value, CacheError>;

    fn key(id: impl Display) -> String {
        format!("{}{id}", Self::PREFIX)
    }
}

fn to_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::Codec(e.to_string()))
}

fn from_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
}

/// `unread_count:{receiver}`: decimal counter.
pub struct UnreadCount;

impl CacheNamespace for UnreadCount {
    const PREFIX: &'static str = "unread_count:";
    type Value = i64;

    fn encode(value: &i64) -> Result<Vec<u8>, CacheError> {
        Ok(value.to_string().into_bytes())
    }

    fn decode(bytes: &[u8]) -> Result<i64, CacheError> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| CacheError::Codec("unread count is not a decimal integer".to_string()))
    }
}

/// `recent_notices:{receiver}`: newest-first list of views.
pub struct RecentNotices;

impl CacheNamespace for RecentNotices {
    const PREFIX: &'static str = "recent_notices:";
    type Value = NoticeView;

    fn encode(value: &NoticeView) -> Result<Vec<u8>, CacheError> {
        to_msgpack(value)
    }

    fn decode(bytes: &[u8]) -> Result<NoticeView, CacheError> {
        from_msgpack(bytes)
    }
}

/// A view queued for a receiver that was offline when it was pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotice {
    pub view: NoticeView,
    /// Millis since epoch when the view was queued.
    pub queued_at: i64,
}

/// `pending_notices:{receiver}`: FIFO of views awaiting reconciliation.
pub struct PendingNotices;

impl CacheNamespace for PendingNotices {
    const PREFIX: &'static str = "pending_notices:";
    type Value = PendingNotice;

    fn encode(value: &PendingNotice) -> Result<Vec<u8>, CacheError> {
        to_msgpack(value)
    }

    fn decode(bytes: &[u8]) -> Result<PendingNotice, CacheError> {
        from_msgpack(bytes)
    }
}

/// Opaque proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// A fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// `lock:{name}`: holder token of a mutual-exclusion lock.
pub struct Locks;

impl CacheNamespace for Locks {
    const PREFIX: &'static str = "lock:";
    type Value = LockToken;

    fn encode(value: &LockToken) -> Result<Vec<u8>, CacheError> {
        Ok(value.0.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<LockToken, CacheError> {
        String::from_utf8(bytes.to_vec())
            .map(LockToken)
            .map_err(|e| CacheError::Codec(e.to_string()))
    }
}

/// Key of `receiver`'s entry in namespace `N`.
#[must_use]
pub fn receiver_key<N: CacheNamespace>(receiver: UserId) -> String {
    N::key(receiver)
}
