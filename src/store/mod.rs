//! Aggregate storage tiers
//!
//! - `hot`: live counters, atomic per-field increments (memory or SQLite)
//! - `cold`: durable daily documents written by the flusher
//! - `keys`: the `{prefix}:{day}:{type}` key design shared by both hot backends

pub mod cold;
pub mod error;
pub mod hot;
pub mod keys;
pub mod sqlite_hot;

pub use cold::{ColdStore, SqliteColdStore, UpsertSummary};
pub use error::StoreError;
pub use hot::{load_aggregates, scan_aggregates, HotFields, HotStore, MemoryHotStore};
pub use keys::{glob_match, KeyDesign, DEFAULT_KEY_PREFIX};
pub use sqlite_hot::SqliteHotStore;
