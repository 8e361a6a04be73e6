//! In-process [`CacheBackend`] backed by [`DashMap`].
//!
//! Values expire lazily: an expired entry reads as absent and is dropped by
//! the next write to its key or by [`CacheBackend::purge_expired`].
//! Counters are stored as ASCII decimal, the way a remote cache stores them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheError, ListEnd};

enum Stored {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

struct Slot {
    value: Stored,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

fn parse_counter(key: &str, bytes: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| CacheError::WrongType {
            key: key.to_string(),
        })
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType {
        key: key.to_string(),
    }
}

/// Volatile TTL cache for a single process.
pub struct MemoryCacheBackend {
    entries: DashMap<String, Slot>,
    offline: AtomicBool,
}

impl MemoryCacheBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates an outage: while offline every operation fails with
    /// [`CacheError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(CacheError::Unavailable("memory cache is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn drop_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, slot| !slot.is_live(now));
    }

    /// Applies `f` to the counter at `key` if it is live, storing the result.
    fn update_counter(
        &self,
        key: &str,
        ttl: Duration,
        f: impl FnOnce(i64) -> Option<i64>,
    ) -> Result<Option<i64>, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        self.drop_if_expired(key, now);

        let Some(mut guard) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let slot = &mut *guard;
        let Stored::Bytes(bytes) = &mut slot.value else {
            return Err(wrong_type(key));
        };
        let current = parse_counter(key, bytes)?;
        match f(current) {
            Some(next) => {
                *bytes = next.to_string().into_bytes();
                slot.expires_at = now + ttl;
                Ok(Some(next))
            }
            None => Ok(Some(current)),
        }
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn push_block(list: &mut VecDeque<Vec<u8>>, values: Vec<Vec<u8>>, end: ListEnd, max_len: usize) {
    match end {
        ListEnd::Front => {
            for value in values.into_iter().rev() {
                list.push_front(value);
            }
            list.truncate(max_len);
        }
        ListEnd::Back => {
            list.extend(values);
            while list.len() > max_len {
                list.pop_front();
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Stored::Bytes(bytes) => Ok(Some(bytes.clone())),
                Stored::List(_) => Err(wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.ensure_online()?;
        self.entries.insert(
            key.to_string(),
            Slot {
                value: Stored::Bytes(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, CacheError> {
        self.update_counter(key, ttl, |n| Some(n.saturating_add(delta)))
    }

    async fn decr_if_positive(&self, key: &str, ttl: Duration) -> Result<Option<i64>, CacheError> {
        self.update_counter(key, ttl, |n| (n > 0).then(|| n - 1))
    }

    async fn list_push(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        end: ListEnd,
        max_len: usize,
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        self.drop_if_expired(key, now);

        let mut guard = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: Stored::List(VecDeque::new()),
            expires_at: now + ttl,
        });
        let slot = &mut *guard;
        let Stored::List(list) = &mut slot.value else {
            return Err(wrong_type(key));
        };

        push_block(list, values, end, max_len);
        slot.expires_at = now + ttl;
        let len = list.len();
        drop(guard);

        if len == 0 {
            self.entries.remove(key);
        }
        Ok(len)
    }

    async fn list_push_existing(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        end: ListEnd,
        max_len: usize,
        ttl: Duration,
    ) -> Result<Option<usize>, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        self.drop_if_expired(key, now);

        let Some(mut guard) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let slot = &mut *guard;
        let Stored::List(list) = &mut slot.value else {
            return Err(wrong_type(key));
        };

        push_block(list, values, end, max_len);
        slot.expires_at = now + ttl;
        let len = list.len();
        drop(guard);

        if len == 0 {
            self.entries.remove(key);
        }
        Ok(Some(len))
    }

    async fn list_replace(
        &self,
        key: &str,
        values: Vec<Vec<u8>>,
        max_len: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.ensure_online()?;
        let list: VecDeque<Vec<u8>> = values.into_iter().take(max_len).collect();
        if list.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(
                key.to_string(),
                Slot {
                    value: Stored::List(list),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Stored::List(list) => Ok(list.iter().cloned().collect()),
                Stored::Bytes(_) => Err(wrong_type(key)),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => match &slot.value {
                Stored::List(list) => Ok(list.len()),
                Stored::Bytes(_) => Err(wrong_type(key)),
            },
            _ => Ok(0),
        }
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let slot = Slot {
            value: Stored::Bytes(value),
            expires_at: now + ttl,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, slot| {
                slot.is_live(now)
                    && matches!(&slot.value, Stored::Bytes(bytes) if bytes.as_slice() == expected)
            })
            .is_some())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
