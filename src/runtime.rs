//! Process wiring: open the stores, spawn the supervised tasks, shut down
//!
//! Shutdown is two-staged. Graceful: request cancellation and give every task
//! `graceful_shutdown_timeout` to observe it. Forced (timeout elapsed, or a
//! second Ctrl-C): abort whatever is still running and wait briefly for the
//! aborts to land.

use crate::config::{AppConfig, HotBackend};
use crate::pipeline::aggregator::run_aggregator;
use crate::pipeline::cancellation::{sleep_unless_cancelled, CancellationFlag};
use crate::pipeline::cutoff::CutoffOffset;
use crate::pipeline::flusher::run_flusher;
use crate::pipeline::producer::run_producer;
use crate::pipeline::query::QueryMerger;
use crate::pipeline::queue::{SqliteQueue, TransactionQueue};
use crate::pipeline::supervisor::{run_supervised, FatalHandler};
use crate::store::{
    ColdStore, HotStore, KeyDesign, MemoryHotStore, SqliteColdStore, SqliteHotStore, StoreError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Open handles to the queue and both tiers
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<SqliteQueue>,
    pub hot: Arc<dyn HotStore>,
    pub cold: Arc<SqliteColdStore>,
}

impl Stores {
    /// Open every store named by `config`, creating schemas as needed
    ///
    /// The queue and cold tier share `db_path` on separate connections.
    pub fn open(config: &AppConfig) -> Result<Self, StoreError> {
        let keys = KeyDesign::new(config.key_prefix.clone());

        let hot: Arc<dyn HotStore> = match config.hot_backend {
            HotBackend::Memory => Arc::new(MemoryHotStore::new(keys)),
            HotBackend::Sqlite => Arc::new(SqliteHotStore::open(&config.hot_db_path, keys)?),
        };
        let queue = Arc::new(SqliteQueue::open(&config.db_path, config.queue_name.clone())?);
        let cold = Arc::new(SqliteColdStore::open(&config.db_path)?);

        log::info!("🔧 Stores opened");
        log::info!("   ├─ Queue: {} ({})", config.db_path.display(), config.queue_name);
        log::info!("   ├─ Hot tier: {} (prefix '{}')", hot.backend_type(), config.key_prefix);
        log::info!("   └─ Cold tier: {} ({})", cold.backend_type(), config.db_path.display());

        Ok(Self { queue, hot, cold })
    }

    pub fn query_merger(&self, offset: CutoffOffset) -> QueryMerger {
        let cold: Arc<dyn ColdStore> = self.cold.clone();
        QueryMerger::new(self.hot.clone(), cold, offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task observed cancellation and exited in time
    Completed,
    /// Grace period elapsed; these tasks were aborted
    TimedOut { aborted: Vec<String> },
    /// Forced before the grace period elapsed; these tasks were aborted
    Forced { aborted: Vec<String> },
}

impl ShutdownOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Completed)
    }
}

/// Named handles of every spawned long-running task
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    async fn join_all(&mut self) {
        for (name, handle) in self.tasks.iter_mut() {
            if handle.is_finished() {
                continue;
            }
            match handle.await {
                Ok(()) => log::info!("   ├─ ✅ {} stopped", name),
                Err(e) if e.is_cancelled() => log::debug!("   ├─ {} abort landed", name),
                Err(e) => log::error!("   ├─ ❌ {} panicked: {}", name, e),
            }
        }
    }

    /// Cancel, then wait up to `grace` for every task (or until `force` resolves)
    pub async fn graceful_shutdown<F>(
        &mut self,
        cancel: &CancellationFlag,
        grace: Duration,
        forced_wait: Duration,
        force: F,
    ) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        log::info!(
            "🛑 Graceful shutdown: waiting up to {:?} for {} tasks",
            grace,
            self.tasks.len()
        );
        cancel.request_cancel();

        tokio::pin!(force);
        let forced = tokio::select! {
            result = timeout(grace, self.join_all()) => {
                if result.is_ok() {
                    log::info!("✅ All tasks stopped cleanly");
                    return ShutdownOutcome::Completed;
                }
                false
            }
            _ = &mut force => true,
        };

        if forced {
            log::warn!("⚠️  Shutdown forced before grace period elapsed");
        } else {
            log::warn!("⚠️  Grace period of {:?} elapsed, aborting remaining tasks", grace);
        }

        let aborted = self.force_shutdown(forced_wait).await;
        if forced {
            ShutdownOutcome::Forced { aborted }
        } else {
            ShutdownOutcome::TimedOut { aborted }
        }
    }

    /// Abort every unfinished task and wait up to `wait` for the aborts
    ///
    /// Returns the names of the tasks that were aborted.
    pub async fn force_shutdown(&mut self, wait: Duration) -> Vec<String> {
        let mut aborted = Vec::new();
        for (name, handle) in self.tasks.iter() {
            if !handle.is_finished() {
                handle.abort();
                aborted.push(name.clone());
            }
        }

        if timeout(wait, self.join_all()).await.is_err() {
            log::error!("❌ Tasks still running {:?} after abort", wait);
        }
        for name in &aborted {
            log::warn!("   └─ aborted: {}", name);
        }
        aborted
    }
}

/// Spawn producer, aggregator and flusher, each under supervision
pub fn spawn_pipeline(
    config: &AppConfig,
    stores: &Stores,
    cancel: &CancellationFlag,
    handler: Arc<dyn FatalHandler>,
) -> BackgroundTasks {
    let mut tasks = BackgroundTasks::new();

    {
        let queue = stores.queue.clone();
        let csv_path = config.csv_path.clone();
        let policy = config.malformed_lines;
        let retry = config.retry.clone();
        let cancel = cancel.clone();
        let handler = handler.clone();

        tasks.push(
            "producer",
            tokio::spawn(async move {
                run_supervised("producer", &retry, &cancel, handler.as_ref(), || {
                    let queue = queue.clone();
                    let csv_path = csv_path.clone();
                    let cancel = cancel.clone();
                    async move { run_producer(&csv_path, queue.as_ref(), policy, &cancel).await }
                })
                .await;
            }),
        );
    }

    {
        let queue = stores.queue.clone();
        let hot = stores.hot.clone();
        let pop_timeout = config.queue_pop_timeout;
        let retry = config.retry.clone();
        let cancel = cancel.clone();
        let handler = handler.clone();

        tasks.push(
            "aggregator",
            tokio::spawn(async move {
                run_supervised("aggregator", &retry, &cancel, handler.as_ref(), || {
                    let queue = queue.clone();
                    let hot = hot.clone();
                    let cancel = cancel.clone();
                    async move {
                        run_aggregator(queue.as_ref(), hot.as_ref(), pop_timeout, &cancel).await
                    }
                })
                .await;
            }),
        );
    }

    {
        let hot = stores.hot.clone();
        let cold = stores.cold.clone();
        let interval = config.flush_interval;
        let retry = config.retry.clone();
        let cancel = cancel.clone();

        tasks.push(
            "flusher",
            tokio::spawn(async move {
                run_supervised("flusher", &retry, &cancel, handler.as_ref(), || {
                    let hot = hot.clone();
                    let cold = cold.clone();
                    let cancel = cancel.clone();
                    async move { run_flusher(hot.as_ref(), cold.as_ref(), interval, &cancel).await }
                })
                .await;
            }),
        );
    }

    log::info!("🚀 Spawned tasks: {}", tasks.names().join(", "));
    tasks
}

/// Log queue depth every `interval` until cancelled
pub fn spawn_health_monitor(
    tasks: &mut BackgroundTasks,
    queue: Arc<SqliteQueue>,
    interval: Duration,
    cancel: &CancellationFlag,
) {
    let cancel = cancel.clone();
    tasks.push(
        "health",
        tokio::spawn(async move {
            while sleep_unless_cancelled(&cancel, interval).await {
                match queue.len().await {
                    Ok(depth) => log::info!("💓 Queue '{}' depth: {}", queue.name(), depth),
                    Err(e) => log::warn!("⚠️  Queue depth unavailable: {}", e),
                }
            }
        }),
    );
}
