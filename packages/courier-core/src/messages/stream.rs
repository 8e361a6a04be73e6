//! Server-to-client events written to a live notification stream.

use serde::{Deserialize, Serialize};

use crate::types::NoticeView;

/// Payload carried by every heartbeat frame.
pub const HEARTBEAT_PAYLOAD: &str = "ping";

/// An event pushed to a connected receiver.
///
/// Serialized with an internal `type` discriminator so binary and JSON
/// transports agree on the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Acknowledgement sent once, right after a stream is registered.
    #[serde(rename = "CONNECTED")]
    Connected { message: String },

    /// A notice delivered live or replayed from the pending queue.
    #[serde(rename = "NOTIFICATION")]
    Notification { payload: NoticeView },

    /// Keep-alive frame written on every heartbeat tick.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

impl ServerEvent {
    /// The standard acknowledgement frame.
    #[must_use]
    pub fn connected() -> Self {
        Self::Connected {
            message: "notification stream established".to_string(),
        }
    }

    #[must_use]
    pub fn notification(payload: NoticeView) -> Self {
        Self::Notification { payload }
    }

    /// Event category name, used as the SSE `event:` field.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Notification { .. } => "notification",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Payload only (no envelope) as JSON text, for category-framed transports.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Connected { message } => serde_json::to_string(message),
            Self::Notification { payload } => serde_json::to_string(payload),
            Self::Heartbeat => serde_json::to_string(HEARTBEAT_PAYLOAD),
        }
    }

    /// Full envelope as named `MsgPack`, for binary transports.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }
}
