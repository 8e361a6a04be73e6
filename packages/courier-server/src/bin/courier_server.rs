//! `courier-server` binary: wires the hub, the HTTP surface, and the
//! background workers, then serves until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use courier_core::UserId;
use courier_server::cache::MemoryCacheBackend;
use courier_server::network::{
    ConnectionRegistry, HeaderIdentityResolver, IdentityResolver, JwtIdentityResolver,
    NetworkModule, TlsConfig,
};
use courier_server::service::{CourierConfig, NotificationHub};
use courier_server::storage::MemoryDeliveryStore;
use courier_server::DeliveryStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Real-time notification delivery server.
#[derive(Parser, Debug)]
#[command(name = "courier-server", version, about, long_about = None)]
struct Args {
    #[arg(long, env = "COURIER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "COURIER_PORT", default_value_t = 8080)]
    port: u16,

    /// Durable store file. Without it deliveries live in memory only.
    #[arg(long, env = "COURIER_DB")]
    db: Option<PathBuf>,

    /// HS256 secret for bearer tokens. Without it the `x-user-id` header is trusted.
    #[arg(long, env = "COURIER_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[arg(long, env = "COURIER_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "COURIER_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Seconds between heartbeat frames.
    #[arg(long, env = "COURIER_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Minutes before a live stream is ended and the client reconnects.
    #[arg(long, env = "COURIER_STREAM_LIFETIME_MINS", default_value_t = 30)]
    stream_lifetime_mins: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "COURIER_JSON_LOGS")]
    json_logs: bool,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "COURIER_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Seed a receiver into the directory, as `id:name`. Repeatable.
    #[arg(long = "receiver", value_parser = parse_receiver)]
    receivers: Vec<(UserId, String)>,
}

fn parse_receiver(raw: &str) -> Result<(UserId, String), String> {
    let (id, name) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected id:name, got {raw:?}"))?;
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid receiver id {id:?}: {e}"))?;
    Ok((UserId(id), name.trim().to_string()))
}

impl Args {
    fn courier_config(&self) -> CourierConfig {
        let mut config = CourierConfig::default();
        config.network.host.clone_from(&self.host);
        config.network.port = self.port;
        config.network.connection.heartbeat_interval = Duration::from_secs(self.heartbeat_secs);
        config.network.connection.max_stream_lifetime =
            Duration::from_secs(self.stream_lifetime_mins * 60);
        if let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) {
            config.network.tls = Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            });
        }
        config
    }

    fn identity(&self) -> Arc<dyn IdentityResolver> {
        match &self.jwt_secret {
            Some(secret) => Arc::new(JwtIdentityResolver::new(secret.as_bytes())),
            None => {
                warn!("no JWT secret configured, trusting the x-user-id header");
                Arc::new(HeaderIdentityResolver)
            }
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(feature = "redb")]
fn open_store(path: Option<&PathBuf>) -> anyhow::Result<Arc<dyn DeliveryStore>> {
    match path {
        Some(path) => Ok(Arc::new(courier_server::storage::RedbDeliveryStore::open(path)?)),
        None => Ok(Arc::new(MemoryDeliveryStore::new())),
    }
}

#[cfg(not(feature = "redb"))]
fn open_store(path: Option<&PathBuf>) -> anyhow::Result<Arc<dyn DeliveryStore>> {
    if path.is_some() {
        anyhow::bail!("--db requires the redb feature");
    }
    Ok(Arc::new(MemoryDeliveryStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    if let Some(port) = args.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()
            .context("installing Prometheus exporter")?;
        info!(port, "metrics exporter listening");
    }

    let config = args.courier_config();
    let store = open_store(args.db.as_ref())?;
    store.initialize().await.context("initializing delivery store")?;
    for (id, name) in &args.receivers {
        store.upsert_receiver(*id, name).await?;
    }

    let hub = Arc::new(NotificationHub::new(
        config.clone(),
        store,
        Arc::new(MemoryCacheBackend::new()),
        Arc::new(ConnectionRegistry::new()),
    ));
    let background = hub.start_background();

    let mut module = NetworkModule::new(config.network, Arc::clone(&hub), args.identity());
    let port = module.start().await?;
    info!(port, receivers = args.receivers.len(), "courier server starting");

    let served = module
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Ctrl-C received, shutting down");
        })
        .await;

    background.stop().await;
    served
}
