//! Error type shared by the notification services.

use courier_core::UserId;

/// Failure surfaced by a Courier operation.
///
/// Cache and transport failures never appear here: they are recovered
/// locally. Only identity problems and durable-store failures propagate.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// No receiver identity could be resolved for the request.
    #[error("unauthorized: no receiver identity")]
    Unauthorized,

    /// The identity resolved to a receiver the directory does not know.
    #[error("unknown receiver {0}")]
    UnknownReceiver(UserId),

    /// The durable store rejected or failed an operation.
    #[error("durable store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl CourierError {
    /// Whether the error should be reported to a client as an identity problem.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::UnknownReceiver(_))
    }
}
