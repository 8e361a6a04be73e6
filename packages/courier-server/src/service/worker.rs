//! Periodic background work: heartbeats to live streams and cache sweeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::traits::LiveRegistry;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Work executed by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    async fn on_tick(&mut self) {}

    /// Runs once after the worker is stopped.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Tasks accepted by the heartbeat worker.
#[derive(Debug)]
pub enum HeartbeatTask {
    /// Beat immediately instead of waiting for the next tick.
    BeatNow,
}

/// Writes a keep-alive frame to every live connection on each tick.
pub struct HeartbeatRunnable {
    registry: Arc<dyn LiveRegistry>,
}

impl HeartbeatRunnable {
    #[must_use]
    pub fn new(registry: Arc<dyn LiveRegistry>) -> Self {
        Self { registry }
    }

    fn beat(&self) {
        let report = self.registry.heartbeat();
        if report.evicted > 0 {
            info!(sent = report.sent, evicted = report.evicted, "heartbeat evicted stale connections");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for HeartbeatRunnable {
    type Task = HeartbeatTask;

    async fn run(&mut self, task: HeartbeatTask) {
        match task {
            HeartbeatTask::BeatNow => self.beat(),
        }
    }

    async fn on_tick(&mut self) {
        self.beat();
    }
}

// ---------------------------------------------------------------------------
// Cache sweep
// ---------------------------------------------------------------------------

/// Tasks accepted by the cache sweep worker.
#[derive(Debug)]
pub enum SweepTask {
    /// Sweep immediately instead of waiting for the next tick.
    SweepNow,
}

/// Drops expired cache entries on each tick.
pub struct CacheSweepRunnable {
    backend: Arc<dyn CacheBackend>,
}

impl CacheSweepRunnable {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    async fn sweep(&self) {
        match self.backend.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "swept expired cache entries"),
            Err(err) => warn!(error = %err, "cache sweep failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for CacheSweepRunnable {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::SweepNow => self.sweep().await,
        }
    }

    async fn on_tick(&mut self) {
        self.sweep().await;
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

const TASK_QUEUE: usize = 256;

/// Drives a [`BackgroundRunnable`] on its own task: on-demand tasks arrive
/// over a bounded channel, `on_tick` fires every `tick_interval`.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker. The first tick fires one interval after start.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_QUEUE);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                    _ = &mut stop_rx => break,
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task, waiting for room in the channel.
    ///
    /// # Errors
    ///
    /// Returns an error once the worker has stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let Some(tx) = &self.tx else {
            anyhow::bail!("worker not running");
        };
        tx.send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker channel closed"))
    }

    /// Signals the worker, runs its `shutdown` hook, and waits for it to exit.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The worker may already be gone.
            let _ = stop_tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "background worker panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use courier_core::{ServerEvent, UserId};

    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::network::connection::{ChannelSink, ConnectionRegistry, OutboundMessage};

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        tick_count: Arc<AtomicU32>,
        shutdown_called: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.tick_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_called.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (CountingRunnable, Arc<AtomicU32>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let run_count = Arc::new(AtomicU32::new(0));
        let tick_count = Arc::new(AtomicU32::new(0));
        let shutdown_called = Arc::new(AtomicU32::new(0));
        let runnable = CountingRunnable {
            run_count: run_count.clone(),
            tick_count: tick_count.clone(),
            shutdown_called: shutdown_called.clone(),
        };
        (runnable, run_count, tick_count, shutdown_called)
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let (runnable, run_count, _, shutdown_called) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));

        worker.submit("task-1".to_string()).await.unwrap();
        worker.submit("task-2".to_string()).await.unwrap();
        worker.submit("task-3".to_string()).await.unwrap();

        // Give the worker time to process tasks.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(run_count.load(Ordering::SeqCst), 3);

        worker.stop().await;
        assert_eq!(shutdown_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_periodically() {
        let (runnable, _, tick_count, _) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(95)).await;
        worker.stop().await;

        assert_eq!(tick_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let (runnable, _, _, _) = counting();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));
        worker.stop().await;

        assert!(worker.submit("late-task".to_string()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_worker_beats_each_interval() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sink, mut rx) = ChannelSink::channel(8);
        registry.register(UserId(1), Box::new(sink));

        let mut worker = BackgroundWorker::start(
            HeartbeatRunnable::new(registry.clone()),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        worker.stop().await;

        let mut beats = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame, OutboundMessage::Event(ServerEvent::Heartbeat));
            beats += 1;
        }
        assert_eq!(beats, 2);
    }

    #[tokio::test]
    async fn heartbeat_task_beats_immediately() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sink, rx) = ChannelSink::channel(8);
        registry.register(UserId(1), Box::new(sink));
        drop(rx);

        let mut worker = BackgroundWorker::start(
            HeartbeatRunnable::new(registry.clone()),
            Duration::from_secs(60),
        );
        worker.submit(HeartbeatTask::BeatNow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop().await;

        assert_eq!(registry.online_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_worker_purges_expired_entries() {
        let backend = Arc::new(MemoryCacheBackend::new());
        backend
            .set("k", b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();

        let mut worker = BackgroundWorker::start(
            CacheSweepRunnable::new(backend.clone()),
            Duration::from_secs(10),
        );
        tokio::time::sleep(Duration::from_secs(11)).await;
        worker.stop().await;

        assert!(backend.is_empty());
    }
}
