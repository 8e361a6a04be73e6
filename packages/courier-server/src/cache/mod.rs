//! Cache layer: a key-value backend contract and the typed notification
//! cache built on it.

pub mod backend;
pub mod config;
pub mod memory;
pub mod namespace;
pub mod notification_cache;

pub use backend::{CacheBackend, CacheError, ListEnd};
pub use config::CacheConfig;
pub use memory::MemoryCacheBackend;
pub use namespace::{CacheNamespace, LockToken, PendingNotice};
pub use notification_cache::NotificationCache;
