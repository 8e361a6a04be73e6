//! Composition root for the notification core.
//!
//! [`NotificationHub`] builds every service from a [`CourierConfig`] and the
//! three pluggable backends, owns the connection handshake, and starts the
//! background workers.

use std::sync::Arc;

use courier_core::{ServerEvent, UserId};
use tokio::task::JoinHandle;
use tracing::warn;

use super::config::ServiceConfig;
use super::fanout::NotificationService;
use super::populator::CachePopulator;
use super::reconcile::ReconciliationService;
use super::worker::{BackgroundWorker, CacheSweepRunnable, HeartbeatRunnable};
use crate::cache::{CacheBackend, CacheConfig, MemoryCacheBackend, NotificationCache};
use crate::error::CourierError;
use crate::network::config::NetworkConfig;
use crate::network::connection::{ConnectionId, ConnectionRegistry, EventSink, PushOutcome};
use crate::storage::MemoryDeliveryStore;
use crate::traits::{DeliveryStore, LiveRegistry};

/// Configuration for the whole notification core.
#[derive(Debug, Clone, Default)]
pub struct CourierConfig {
    pub network: NetworkConfig,
    pub cache: CacheConfig,
    pub service: ServiceConfig,
}

/// A stream accepted by [`NotificationHub::open_stream`].
#[derive(Debug)]
pub struct StreamRegistration {
    pub connection_id: ConnectionId,
    /// Background reconciliation pass, if the acknowledgement was delivered.
    pub reconcile: Option<JoinHandle<()>>,
}

/// Running background workers. Stop them on shutdown.
pub struct BackgroundTasks {
    heartbeat: BackgroundWorker<HeartbeatRunnable>,
    sweep: BackgroundWorker<CacheSweepRunnable>,
}

impl BackgroundTasks {
    /// Stops every worker and waits for it to finish.
    pub async fn stop(mut self) {
        self.heartbeat.stop().await;
        self.sweep.stop().await;
    }
}

/// Owns the durable store, cache, live registry, and the services over them.
pub struct NotificationHub {
    config: CourierConfig,
    store: Arc<dyn DeliveryStore>,
    cache: Arc<NotificationCache>,
    registry: Arc<dyn LiveRegistry>,
    notices: NotificationService,
    reconciler: Arc<ReconciliationService>,
}

impl NotificationHub {
    #[must_use]
    pub fn new(
        config: CourierConfig,
        store: Arc<dyn DeliveryStore>,
        backend: Arc<dyn CacheBackend>,
        registry: Arc<dyn LiveRegistry>,
    ) -> Self {
        let cache = Arc::new(NotificationCache::new(backend, config.cache.clone()));
        let notices = NotificationService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&registry),
            CachePopulator::new(&config.service.pool),
        );
        let reconciler = Arc::new(ReconciliationService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&registry),
            config.service.replay_pending_on_connect,
        ));
        Self {
            config,
            store,
            cache,
            registry,
            notices,
            reconciler,
        }
    }

    /// A hub over volatile in-process backends.
    #[must_use]
    pub fn in_memory(config: CourierConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryDeliveryStore::new()),
            Arc::new(MemoryCacheBackend::new()),
            Arc::new(ConnectionRegistry::new()),
        )
    }

    #[must_use]
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<NotificationCache> {
        &self.cache
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn LiveRegistry> {
        &self.registry
    }

    /// Read, notify, and mark-read operations.
    #[must_use]
    pub fn notices(&self) -> &NotificationService {
        &self.notices
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<ReconciliationService> {
        &self.reconciler
    }

    /// Accepts a live stream for `receiver`.
    ///
    /// Registers `sink` (replacing any previous connection), writes the
    /// `connected` acknowledgement, and starts a reconciliation pass in the
    /// background. If the acknowledgement cannot be written the connection
    /// is already evicted and no pass is started.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::UnknownReceiver`] if the directory does not
    /// know `receiver`, or [`CourierError::Store`] if the lookup fails.
    pub async fn open_stream(
        &self,
        receiver: UserId,
        sink: Box<dyn EventSink>,
    ) -> Result<StreamRegistration, CourierError> {
        if !self.store.receiver_exists(receiver).await? {
            return Err(CourierError::UnknownReceiver(receiver));
        }

        let connection_id = self.registry.register(receiver, sink);
        let reconcile = match self.registry.push(receiver, &ServerEvent::connected()) {
            PushOutcome::Delivered => Some(self.reconciler.spawn(receiver)),
            outcome => {
                warn!(receiver_id = %receiver, outcome = outcome.label(), "stream acknowledgement failed");
                None
            }
        };
        Ok(StreamRegistration {
            connection_id,
            reconcile,
        })
    }

    /// Starts the heartbeat and cache sweep workers.
    #[must_use]
    pub fn start_background(&self) -> BackgroundTasks {
        BackgroundTasks {
            heartbeat: BackgroundWorker::start(
                HeartbeatRunnable::new(Arc::clone(&self.registry)),
                self.config.network.connection.heartbeat_interval,
            ),
            sweep: BackgroundWorker::start(
                CacheSweepRunnable::new(Arc::clone(self.cache.backend())),
                self.config.service.cache_sweep_interval,
            ),
        }
    }
}
