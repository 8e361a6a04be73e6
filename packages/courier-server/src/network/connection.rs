//! Live connection registry for the Courier server.
//!
//! Each receiver has at most one live connection. Writes go through an
//! [`EventSink`]; the reference sink is a bounded mpsc channel drained by
//! the transport's write loop, so a slow client fills its channel and is
//! evicted instead of blocking the writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use courier_core::{ServerEvent, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::traits::LiveRegistry;

/// Close reason given to a connection superseded by a newer one.
pub const REPLACED_REASON: &str = "replaced by a newer connection";

/// Close reason given to every connection on graceful shutdown.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Message to be written to a connection by its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// An event frame.
    Event(ServerEvent),
    /// End the stream with an optional reason.
    Close(Option<String>),
}

/// Error returned when a frame cannot be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection has been closed; the receiver was dropped.
    #[error("connection closed")]
    Disconnected,
    /// The outbound channel is full.
    #[error("outbound channel full")]
    Full,
}

/// Write side of one live connection.
///
/// `send` must not block: it either accepts the frame or fails.
pub trait EventSink: Send {
    /// Hands `event` to the transport.
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] if the transport cannot accept the frame.
    fn send(&mut self, event: &ServerEvent) -> Result<(), SendError>;

    /// Asks the transport to end the stream. Best-effort.
    fn close(&mut self, reason: Option<&str>);
}

/// [`EventSink`] backed by a bounded mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelSink {
    /// Creates a sink and the receiver the transport drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Whether the transport is still draining the channel.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, event: &ServerEvent) -> Result<(), SendError> {
        self.tx
            .try_send(OutboundMessage::Event(event.clone()))
            .map_err(|err| match err {
                TrySendError::Full(_) => SendError::Full,
                TrySendError::Closed(_) => SendError::Disconnected,
            })
    }

    fn close(&mut self, reason: Option<&str>) {
        // Ignored: a full or closed channel means the stream is going away anyway.
        let _ = self
            .tx
            .try_send(OutboundMessage::Close(reason.map(str::to_string)));
    }
}

/// A registered connection.
pub struct LiveConnection {
    pub id: ConnectionId,
    pub receiver: UserId,
    pub connected_at: Instant,
    sink: Mutex<Box<dyn EventSink>>,
}

impl LiveConnection {
    fn send(&self, event: &ServerEvent) -> Result<(), SendError> {
        self.sink.lock().send(event)
    }

    fn close(&self, reason: Option<&str>) {
        self.sink.lock().close(reason);
    }
}

/// Result of pushing one event to one receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was handed to the transport.
    Delivered,
    /// The receiver has no live connection.
    Offline,
    /// The write failed and the connection was removed.
    Evicted(SendError),
}

impl PushOutcome {
    #[must_use]
    pub const fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Metric label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Offline => "offline",
            Self::Evicted(_) => "evicted",
        }
    }
}

/// Summary of one heartbeat pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub sent: usize,
    pub evicted: usize,
}

/// Thread-safe registry of live connections, one per receiver.
///
/// Uses `DashMap` for lock-free concurrent lookup. Entries are cloned out
/// of the map before any write so no shard lock is held across a send.
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Arc<LiveConnection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    ///
    /// Connection IDs start at 1 (0 is reserved as "no connection").
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Looks up the live connection of `receiver`.
    #[must_use]
    pub fn get(&self, receiver: UserId) -> Option<Arc<LiveConnection>> {
        self.connections.get(&receiver).map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self) -> Vec<Arc<LiveConnection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Removes `conn` only if it is still the receiver's current connection.
    fn evict(&self, conn: &LiveConnection, err: SendError) -> bool {
        let removed = self
            .connections
            .remove_if(&conn.receiver, |_, current| current.id == conn.id)
            .is_some();
        if removed {
            conn.close(Some("evicted"));
            warn!(receiver_id = %conn.receiver, connection_id = conn.id.0, error = %err, "evicted live connection");
            self.record_online();
        }
        removed
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_online(&self) {
        metrics::gauge!("courier_connections_online").set(self.connections.len() as f64);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRegistry for ConnectionRegistry {
    fn register(&self, receiver: UserId, sink: Box<dyn EventSink>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(LiveConnection {
            id,
            receiver,
            connected_at: Instant::now(),
            sink: Mutex::new(sink),
        });

        if let Some(previous) = self.connections.insert(receiver, conn) {
            previous.close(Some(REPLACED_REASON));
            info!(receiver_id = %receiver, old = previous.id.0, new = id.0, "replaced live connection");
        } else {
            info!(receiver_id = %receiver, connection_id = id.0, "registered live connection");
        }
        self.record_online();
        id
    }

    fn deregister(&self, receiver: UserId, connection: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(&receiver, |_, current| current.id == connection)
            .is_some();
        if removed {
            debug!(receiver_id = %receiver, connection_id = connection.0, "deregistered live connection");
            self.record_online();
        }
        removed
    }

    fn push(&self, receiver: UserId, event: &ServerEvent) -> PushOutcome {
        let outcome = match self.get(receiver) {
            None => PushOutcome::Offline,
            Some(conn) => match conn.send(event) {
                Ok(()) => PushOutcome::Delivered,
                Err(err) => {
                    self.evict(&conn, err);
                    PushOutcome::Evicted(err)
                }
            },
        };
        metrics::counter!("courier_push_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    fn heartbeat(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        if self.connections.is_empty() {
            return report;
        }

        for conn in self.snapshot() {
            match conn.send(&ServerEvent::Heartbeat) {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    if self.evict(&conn, err) {
                        report.evicted += 1;
                    }
                }
            }
        }
        debug!(sent = report.sent, evicted = report.evicted, "heartbeat pass");
        report
    }

    fn close(&self, receiver: UserId, reason: Option<&str>) -> bool {
        let Some((_, conn)) = self.connections.remove(&receiver) else {
            return false;
        };
        conn.close(reason);
        info!(receiver_id = %receiver, connection_id = conn.id.0, "closed live connection");
        self.record_online();
        true
    }

    fn online_count(&self) -> usize {
        self.connections.len()
    }

    fn online_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn is_online(&self, receiver: UserId) -> bool {
        self.connections.contains_key(&receiver)
    }

    fn drain_all(&self) -> usize {
        let receivers: Vec<UserId> = self.connections.iter().map(|entry| *entry.key()).collect();

        let mut drained = 0;
        for receiver in receivers {
            if let Some((_, conn)) = self.connections.remove(&receiver) {
                conn.close(Some(SHUTDOWN_REASON));
                drained += 1;
            }
        }
        self.record_online();
        drained
    }
}
