//! Live notification stream over server-sent events.
//!
//! The handler registers a [`ChannelSink`] with the hub and turns the
//! channel into an SSE body. The stream ends when the registry sends a
//! close frame (replacement, eviction, shutdown drain), when the client
//! goes away, or when the configured lifetime runs out. Dropping the body
//! deregisters the connection.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier_core::{ServerEvent, UserId};
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{ApiError, AppState};
use crate::network::connection::{ChannelSink, ConnectionId, OutboundMessage};
use crate::network::shutdown::InFlightGuard;
use crate::traits::LiveRegistry;

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Token for clients that cannot send an `Authorization` header.
    pub token: Option<String>,
}

/// Deregisters the connection when the response body is dropped.
struct StreamGuard {
    registry: Arc<dyn LiveRegistry>,
    receiver: UserId,
    connection_id: ConnectionId,
    _in_flight: InFlightGuard,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.registry.deregister(self.receiver, self.connection_id) {
            info!(receiver_id = %self.receiver, connection_id = self.connection_id.0, "stream ended");
        }
    }
}

fn to_sse(event: &ServerEvent) -> Event {
    let base = Event::default().event(event.event_name());
    match event.data_json() {
        Ok(data) => base.data(data),
        Err(err) => {
            warn!(event = event.event_name(), error = %err, "event payload not serializable");
            base.comment("unserializable payload")
        }
    }
}

/// `GET /notifications/stream`
///
/// 401 without a resolvable identity or for an unknown receiver, 503 while
/// the server is not ready.
pub async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    if !state.shutdown.health_state().accepts_streams() {
        return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }
    let receiver = state.receiver(&headers, params.token.as_deref())?;

    let connection = &state.config.connection;
    let (sink, rx) = ChannelSink::channel(connection.outbound_channel_capacity);
    let registration = state.hub.open_stream(receiver, Box::new(sink)).await?;

    let guard = StreamGuard {
        registry: Arc::clone(state.hub.registry()),
        receiver,
        connection_id: registration.connection_id,
        _in_flight: state.shutdown.in_flight_guard(),
    };
    let deadline = tokio::time::Instant::now() + connection.max_stream_lifetime;

    let events = stream::unfold(Some((rx, guard)), move |open| async move {
        let (mut rx, guard) = open?;
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(OutboundMessage::Event(event))) => {
                Some((Ok::<_, Infallible>(to_sse(&event)), Some((rx, guard))))
            }
            Ok(Some(OutboundMessage::Close(reason))) => {
                debug!(receiver_id = %guard.receiver, reason = reason.as_deref().unwrap_or(""), "stream closed by server");
                None
            }
            Ok(None) => None,
            Err(_) => {
                debug!(receiver_id = %guard.receiver, "stream lifetime reached");
                None
            }
        }
    });

    Ok(Sse::new(events).into_response())
}

/// `GET /notifications/online-count`
pub async fn online_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.hub.registry();
    Json(json!({
        "onlineCount": registry.online_count(),
        "onlineUsers": registry.online_ids(),
    }))
}
