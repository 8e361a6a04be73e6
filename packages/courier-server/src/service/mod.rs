//! Notification services.
//!
//! 1. **Fanout** (`fanout`): notify, reads, mark-read, delete
//! 2. **Reconciliation** (`reconcile`): catch-up pass on reconnect
//! 3. **Population pool** (`populator`): bounded caller-runs cache writes
//! 4. **Background workers** (`worker`): heartbeat and cache sweep
//! 5. **Hub** (`hub`): wiring and the stream handshake

pub mod config;
pub mod fanout;
pub mod hub;
pub mod populator;
pub mod reconcile;
pub mod worker;

pub use config::{PoolConfig, ServiceConfig};
pub use fanout::{NotificationService, NotifyReport};
pub use hub::{BackgroundTasks, CourierConfig, NotificationHub, StreamRegistration};
pub use populator::{CachePopulator, Dispatch};
pub use reconcile::{ReconcileReport, ReconcileSource, ReconciliationService};
pub use worker::{
    BackgroundRunnable, BackgroundWorker, CacheSweepRunnable, HeartbeatRunnable, HeartbeatTask,
    SweepTask,
};
