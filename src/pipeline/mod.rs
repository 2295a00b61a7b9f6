//! # Aggregation pipeline
//!
//! Producer → Queue → Aggregator → HotStore → Flusher → ColdStore, plus the
//! query path that reads both tiers.
//!
//! ## Module Organization
//!
//! - `types` - Transaction records, aggregate keys, `DailyAggregate`
//! - `queue` - Durable FIFO between producer and aggregator
//! - `producer` - CSV log replay into the queue
//! - `aggregator` - Single consumer folding records into the hot tier
//! - `flusher` - Periodic hot → cold snapshot
//! - `cutoff` - Hot/cold boundary and range splitting
//! - `query` - Range queries merged across tiers
//! - `supervisor` - Retry with backoff, fatal escalation
//! - `cancellation` - Shared shutdown flag

pub mod aggregator;
pub mod cancellation;
pub mod cutoff;
pub mod error;
pub mod flusher;
pub mod producer;
pub mod query;
pub mod queue;
pub mod supervisor;
pub mod types;

pub use aggregator::run_aggregator;
pub use cancellation::{sleep_unless_cancelled, CancellationFlag};
pub use cutoff::{resolve_cutoff, split_range, CutoffOffset, DayRange, TierSplit};
pub use error::PipelineError;
pub use flusher::{flush_once, run_flusher};
pub use producer::{run_producer, MalformedLinePolicy, ProducerSummary};
pub use query::{MergedStats, QueryMerger, StatsTree, Tier};
pub use queue::{SqliteQueue, TransactionQueue};
pub use supervisor::{
    run_supervised, supervise, ExitProcess, FatalError, FatalHandler, LogAndContinue, RetryPolicy,
};
pub use types::{AggregateKey, DailyAggregate, ParseError, TransactionRecord, TransactionType};
