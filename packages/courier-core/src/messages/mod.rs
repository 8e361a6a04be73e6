//! Wire-level event schemas for live notification streams.
//!
//! The transport owns framing (SSE, `WebSocket`, ...). This module only fixes
//! the event category names and payload shapes so every transport emits the
//! same thing. Binary transports use named `MsgPack`
//! (`rmp_serde::to_vec_named()`); text transports use camelCase JSON.

pub mod stream;

pub use stream::{ServerEvent, HEARTBEAT_PAYLOAD};
