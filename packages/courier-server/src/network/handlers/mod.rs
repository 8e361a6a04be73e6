//! HTTP handlers: health probes, REST notice operations, and the live stream.
//!
//! [`AppState`] is the shared state carried through axum extractors;
//! [`ApiError`] maps [`CourierError`] onto status codes.

pub mod health;
pub mod notices;
pub mod stream;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use notices::{
    check_unread_handler, delete_notice_handler, mark_all_read_handler, mark_read_handler,
    notices_all_handler, notices_unread_handler,
};
pub use stream::{online_handler, stream_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier_core::UserId;
use serde_json::json;
use tracing::error;

use super::identity::IdentityResolver;
use super::{NetworkConfig, ShutdownController};
use crate::error::CourierError;
use crate::service::NotificationHub;

/// Shared state for every handler. Cloning copies `Arc`s only.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<NotificationHub>,
    pub identity: Arc<dyn IdentityResolver>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start, for the uptime in the health report.
    pub start_time: Instant,
}

impl AppState {
    /// Resolves the calling receiver or fails with `Unauthorized`.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::Unauthorized`] when no identity is present.
    pub fn receiver(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<UserId, ApiError> {
        self.identity
            .resolve(headers, query_token)
            .ok_or(ApiError(CourierError::Unauthorized))
    }
}

/// Handler error: 401 for identity problems, 500 for everything else.
#[derive(Debug)]
pub struct ApiError(pub CourierError);

impl From<CourierError> for ApiError {
    fn from(err: CourierError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_auth() {
            StatusCode::UNAUTHORIZED
        } else {
            error!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Instant;

    use super::AppState;
    use crate::network::identity::HeaderIdentityResolver;
    use crate::network::ShutdownController;
    use crate::service::{CourierConfig, NotificationHub};

    pub(crate) fn state() -> AppState {
        let config = CourierConfig::default();
        AppState {
            config: Arc::new(config.network.clone()),
            hub: Arc::new(NotificationHub::in_memory(config)),
            identity: Arc::new(HeaderIdentityResolver),
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_401() {
        let response = ApiError(CourierError::UnknownReceiver(UserId(3))).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_errors_map_to_500() {
        let response = ApiError(anyhow::anyhow!("disk gone").into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let state = test_support::state();
        let err = state.receiver(&HeaderMap::new(), None).unwrap_err();
        assert!(matches!(err.0, CourierError::Unauthorized));
    }
}
