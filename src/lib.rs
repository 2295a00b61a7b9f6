//! # txflow
//!
//! Tiered aggregation of financial transaction events.
//!
//! ```text
//! CSV log → Producer → SqliteQueue → Aggregator → HotStore
//!                                                    ↓ (Flusher, every interval)
//!                                                 ColdStore
//! QueryMerger reads HotStore (days ≥ cutoff) + ColdStore (days < cutoff)
//! ```

pub mod config;
pub mod pipeline;
pub mod runtime;
pub mod sqlite_pragma;
pub mod stats;
pub mod store;
