//! Aggregator: the single consumer that folds queued records into the hot tier

use super::cancellation::CancellationFlag;
use super::error::PipelineError;
use super::queue::TransactionQueue;
use super::types::TransactionRecord;
use crate::store::HotStore;
use std::time::Duration;
use tokio::time::Instant;

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Pop → decode → increment until cancelled
///
/// Returns the number of records applied. An undecodable payload is an error
/// (it has already been removed from the queue).
pub async fn run_aggregator(
    queue: &dyn TransactionQueue,
    hot: &dyn HotStore,
    pop_timeout: Duration,
    cancel: &CancellationFlag,
) -> Result<u64, PipelineError> {
    log::info!("🧮 Aggregator started (hot tier: {})", hot.backend_type());

    let mut applied: u64 = 0;
    let mut applied_at_last_log: u64 = 0;
    let mut last_log = Instant::now();

    while !cancel.is_cancelled() {
        if let Some(payload) = queue.pop_timeout(pop_timeout).await? {
            let record = TransactionRecord::from_json(&payload)?;
            let key = record.aggregate_key();

            let total = hot.increment(&key, &record.payment_method, record.amount).await?;
            applied += 1;
            log::debug!(
                "   ├─ {} {} += {:.2} → {:.2}",
                key,
                record.payment_method,
                record.amount,
                total
            );
        }

        if last_log.elapsed() >= THROUGHPUT_LOG_INTERVAL {
            let delta = applied - applied_at_last_log;
            if delta > 0 {
                log::info!(
                    "📊 Aggregator: {} records in last {}s ({} total)",
                    delta,
                    last_log.elapsed().as_secs(),
                    applied
                );
            }
            applied_at_last_log = applied;
            last_log = Instant::now();
        }
    }

    log::info!("🛑 Aggregator stopped after applying {} records", applied);
    Ok(applied)
}
