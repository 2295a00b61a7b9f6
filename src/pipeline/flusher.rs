//! Flusher: periodic full snapshot of the hot tier into the cold tier
//!
//! Every cycle copies every hot key (not just the ones past the cutoff) and
//! replaces the matching cold document wholesale. Hot data is never deleted.

use super::cancellation::{sleep_unless_cancelled, CancellationFlag};
use super::error::PipelineError;
use crate::store::{load_aggregates, ColdStore, HotStore, UpsertSummary};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One scan → batch read → bulk upsert cycle
///
/// Returns `None` when the hot tier holds no keys.
pub async fn flush_once(
    hot: &dyn HotStore,
    cold: &dyn ColdStore,
    now: DateTime<Utc>,
) -> Result<Option<UpsertSummary>, PipelineError> {
    let pattern = hot.key_design().all_keys_pattern();
    let keys = hot.scan(&[pattern]).await?;
    if keys.is_empty() {
        return Ok(None);
    }

    let snapshots = load_aggregates(hot, &keys).await?;
    let summary = cold.bulk_upsert(&snapshots, now).await?;
    Ok(Some(summary))
}

/// Flush every `interval` until cancelled
///
/// Returns the number of cycles that found data.
pub async fn run_flusher(
    hot: &dyn HotStore,
    cold: &dyn ColdStore,
    interval: Duration,
    cancel: &CancellationFlag,
) -> Result<u64, PipelineError> {
    log::info!(
        "💾 Flusher started: {} → {} every {:?}",
        hot.backend_type(),
        cold.backend_type(),
        interval
    );

    let mut cycles: u64 = 0;

    while !cancel.is_cancelled() {
        match flush_once(hot, cold, Utc::now()).await? {
            Some(summary) => {
                cycles += 1;
                if summary.inserted + summary.updated > 0 {
                    log::info!("💾 Flushed {} aggregates: {}", summary.total(), summary);
                } else {
                    log::debug!("💾 Flush cycle: {} aggregates unchanged", summary.unchanged);
                }
            }
            None => log::debug!("💤 Hot tier empty, nothing to flush"),
        }

        if !sleep_unless_cancelled(cancel, interval).await {
            break;
        }
    }

    log::info!("🛑 Flusher stopped after {} cycles", cycles);
    Ok(cycles)
}
