//! Network module with deferred startup.
//!
//! `new()` wires shared state, `start()` binds the listener, and `serve()`
//! accepts connections until the shutdown future resolves. Live streams
//! never finish on their own, so they are closed as soon as shutdown is
//! signalled; the server then waits for in-flight work to drop.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{delete, get, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    check_unread_handler, delete_notice_handler, health_handler, liveness_handler,
    mark_all_read_handler, mark_read_handler, notices_all_handler, notices_unread_handler,
    online_handler, readiness_handler, stream_handler, AppState,
};
use super::identity::IdentityResolver;
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::NotificationHub;
use crate::traits::LiveRegistry;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the HTTP server lifecycle around a [`NotificationHub`].
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    hub: Arc<NotificationHub>,
    identity: Arc<dyn IdentityResolver>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding a port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        hub: Arc<NotificationHub>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            config,
            listener: None,
            hub,
            identity,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn hub(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.hub)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles every route behind the shared middleware stack.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            identity: Arc::clone(&self.identity),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/notifications/stream", get(stream_handler))
            .route("/notifications/online-count", get(online_handler))
            .route("/notices/me/unread", get(notices_unread_handler))
            .route("/notices/me/all", get(notices_all_handler))
            .route("/notices/check", get(check_unread_handler))
            .route("/notices/mark-read/{notice_id}", put(mark_read_handler))
            .route("/notices/mark-all-read", put(mark_all_read_handler))
            .route("/notices/{notice_id}", delete(delete_notice_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// On the signal the health state moves to `Draining` and every live
    /// stream gets a close frame. After the server stops, waits up to 30
    /// seconds for in-flight requests and streams before `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, if TLS material cannot
    /// be loaded, or on a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();

        let hub = Arc::clone(&self.hub);
        let ctrl = Arc::clone(&self.shutdown);
        let signal = async move {
            shutdown.await;
            begin_drain(&hub, &ctrl);
        };

        self.shutdown.set_ready();

        if let Some(tls) = &self.config.tls {
            serve_tls(listener, router, tls, signal).await?;
        } else {
            serve_plain(listener, router, signal).await?;
        }

        finish_drain(&self.shutdown).await;
        Ok(())
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");
    axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await?;
    Ok(())
}

/// Reuses the bound listener through `axum-server` with rustls.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        signal.await;
        shutdown_handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
    });

    info!(%addr, "serving TLS");
    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Refuses new streams and closes every live one.
fn begin_drain(hub: &NotificationHub, ctrl: &ShutdownController) {
    ctrl.trigger_shutdown();
    let closed = hub.registry().drain_all();
    info!(streams = closed, "shutdown signalled, live streams closed");
}

async fn finish_drain(ctrl: &ShutdownController) {
    if ctrl.wait_for_drain(DRAIN_TIMEOUT).await {
        info!("drained");
    } else {
        warn!(in_flight = ctrl.in_flight_count(), "drain timeout expired");
    }
}
