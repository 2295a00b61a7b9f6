//! Pipeline Runtime
//!
//! Long-running process:
//! - Opens the queue, hot tier and cold tier (schemas created on first run)
//! - Spawns producer, aggregator and flusher under supervision
//! - Logs queue depth periodically
//! - CTRL+C: graceful shutdown; second CTRL+C: forced shutdown
//!
//! Usage:
//!   cargo run --release --bin pipeline_runtime
//!
//! Configuration comes from the environment (or `.env`); see `AppConfig::from_env`.
//! Exit code is 1 when a task exhausts its retries or shutdown times out.

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use txflow::config::AppConfig;
use txflow::pipeline::{CancellationFlag, ExitProcess};
use txflow::runtime::{spawn_health_monitor, spawn_pipeline, ShutdownOutcome, Stores};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 txflow pipeline runtime");

    let config = AppConfig::from_env()?;
    info!("   ├─ CSV log: {}", config.csv_path.display());
    info!("   ├─ Hot backend: {}", config.hot_backend);
    info!("   ├─ Flush interval: {:?}", config.flush_interval);
    info!(
        "   ├─ Cutoff offset: {}d {}m {}s",
        config.cutoff.days, config.cutoff.minutes, config.cutoff.seconds
    );
    info!(
        "   └─ Retry: {} attempts, {:?}..{:?}",
        config.retry.stop_attempt_count, config.retry.min_wait, config.retry.max_wait
    );

    let stores = Stores::open(&config)?;
    let cancel = CancellationFlag::new();

    let mut tasks = spawn_pipeline(&config, &stores, &cancel, Arc::new(ExitProcess::default()));
    spawn_health_monitor(&mut tasks, stores.queue.clone(), HEALTH_LOG_INTERVAL, &cancel);

    info!("🔄 Press CTRL+C to shutdown gracefully");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for CTRL+C: {}", err);
    }
    info!("");
    info!("⚠️  Received CTRL+C, shutting down (press again to force)...");

    let second_ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let outcome = tasks
        .graceful_shutdown(
            &cancel,
            config.graceful_shutdown_timeout,
            config.forced_shutdown_timeout,
            second_ctrl_c,
        )
        .await;

    match outcome {
        ShutdownOutcome::Completed => {
            info!("✅ Pipeline runtime stopped");
            Ok(())
        }
        ShutdownOutcome::TimedOut { aborted } | ShutdownOutcome::Forced { aborted } => {
            error!("❌ Shutdown incomplete, aborted: {}", aborted.join(", "));
            std::process::exit(1);
        }
    }
}
