//! Ingestion producer: replays the CSV transaction log into the queue
//!
//! Lines are pushed in file order, each followed by its advisory
//! `replay_delay_ms`. The header line is skipped, as are blank lines.

use super::cancellation::{sleep_unless_cancelled, CancellationFlag};
use super::error::PipelineError;
use super::queue::TransactionQueue;
use super::types::TransactionRecord;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// What to do with a line that doesn't parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedLinePolicy {
    /// Stop the import with `PipelineError::Parse` (left to supervision)
    #[default]
    Abort,
    /// Log the line and keep going
    SkipAndLog,
}

impl FromStr for MalformedLinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(MalformedLinePolicy::Abort),
            "skip" | "skip_and_log" => Ok(MalformedLinePolicy::SkipAndLog),
            other => Err(format!(
                "unknown malformed-line policy '{}' (expected abort|skip)",
                other
            )),
        }
    }
}

impl fmt::Display for MalformedLinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedLinePolicy::Abort => write!(f, "abort"),
            MalformedLinePolicy::SkipAndLog => write!(f, "skip"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    pub pushed: u64,
    pub skipped: u64,
    /// Stopped early because cancellation was requested
    pub cancelled: bool,
}

/// Replay `csv_path` into `queue`
///
/// Returns at EOF, or as soon as `cancel` is observed between lines.
pub async fn run_producer(
    csv_path: &Path,
    queue: &dyn TransactionQueue,
    policy: MalformedLinePolicy,
    cancel: &CancellationFlag,
) -> Result<ProducerSummary, PipelineError> {
    log::info!("📥 Producer reading {} (malformed lines: {})", csv_path.display(), policy);

    let file = File::open(csv_path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut summary = ProducerSummary::default();
    let mut line_number: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;

        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        if line_number == 1 || line.trim().is_empty() {
            continue;
        }

        let record = match TransactionRecord::from_csv_line(&line) {
            Ok(record) => record,
            Err(source) => match policy {
                MalformedLinePolicy::Abort => {
                    return Err(PipelineError::Parse { line_number, source });
                }
                MalformedLinePolicy::SkipAndLog => {
                    log::warn!(
                        "⚠️  Skipping malformed line {}: {} ({:?})",
                        line_number,
                        source,
                        line
                    );
                    summary.skipped += 1;
                    continue;
                }
            },
        };

        queue.push(&record.to_json()?).await?;
        summary.pushed += 1;
        log::debug!(
            "   ├─ queued {} {} {:.2}",
            record.aggregate_key(),
            record.payment_method,
            record.amount
        );

        if record.replay_delay_ms > 0
            && !sleep_unless_cancelled(cancel, Duration::from_millis(record.replay_delay_ms)).await
        {
            summary.cancelled = true;
            break;
        }
    }

    if summary.cancelled {
        log::info!("🛑 Producer stopped by cancellation after {} records", summary.pushed);
    } else {
        log::info!(
            "✅ Producer finished: {} records queued, {} skipped",
            summary.pushed,
            summary.skipped
        );
    }

    Ok(summary)
}
