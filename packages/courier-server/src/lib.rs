//! Courier Server: live notification fanout over SSE, cache-aside delivery
//! state, and reconnect reconciliation.

pub mod cache;
pub mod error;
pub mod network;
pub mod service;
pub mod storage;
pub mod traits;

pub use error::CourierError;
pub use service::{CourierConfig, NotificationHub};
pub use traits::{AdvanceScope, DeliveryStore, LiveRegistry, StatusFilter};
