//! Fast tier: live per-(day, type) counters keyed by payment method
//!
//! The aggregator is the only writer. The flusher and the query merger read
//! concurrently; every increment is a single atomic read-modify-write at the
//! storage layer, so no external locking is involved.

use super::error::StoreError;
use super::keys::{glob_match, KeyDesign};
use crate::pipeline::types::{AggregateKey, DailyAggregate};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Field map stored under one hot key: payment method → cumulative amount
pub type HotFields = BTreeMap<String, f64>;

#[async_trait]
pub trait HotStore: Send + Sync {
    /// Atomically add `amount` to `payment_method` under `key`
    ///
    /// Returns the field value after the increment.
    async fn increment(
        &self,
        key: &AggregateKey,
        payment_method: &str,
        amount: f64,
    ) -> Result<f64, StoreError>;

    /// Enumerate raw keys matching any of the glob patterns (deduplicated, sorted)
    async fn scan(&self, patterns: &[String]) -> Result<Vec<String>, StoreError>;

    /// Read every field of every key in one round trip
    ///
    /// Output is positionally aligned with `keys`; a missing key yields an empty map.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<HotFields>, StoreError>;

    fn key_design(&self) -> &KeyDesign;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Batch-read `keys` and map them into aggregates
///
/// Keys that don't follow the key design and keys with no fields are skipped.
pub async fn load_aggregates(
    store: &dyn HotStore,
    keys: &[String],
) -> Result<Vec<DailyAggregate>, StoreError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let values = store.get_many(keys).await?;
    let design = store.key_design();

    let mut aggregates = Vec::with_capacity(keys.len());
    for (raw_key, fields) in keys.iter().zip(values) {
        let Some(key) = design.parse_key(raw_key) else {
            log::debug!("Skipping hot key outside key design: {}", raw_key);
            continue;
        };
        if fields.is_empty() {
            continue;
        }
        aggregates.push(DailyAggregate::from_hot(key, fields));
    }

    Ok(aggregates)
}

/// Scan for `patterns`, then batch-read whatever matched
pub async fn scan_aggregates(
    store: &dyn HotStore,
    patterns: &[String],
) -> Result<Vec<DailyAggregate>, StoreError> {
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let keys = store.scan(patterns).await?;
    load_aggregates(store, &keys).await
}

/// In-process hot tier
///
/// One mutex guards the whole map; increments and batch reads each take it
/// exactly once, which makes both atomic with respect to each other.
pub struct MemoryHotStore {
    keys: KeyDesign,
    entries: Mutex<BTreeMap<String, HotFields>>,
}

impl MemoryHotStore {
    pub fn new(keys: KeyDesign) -> Self {
        Self {
            keys,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of hot keys currently held
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn increment(
        &self,
        key: &AggregateKey,
        payment_method: &str,
        amount: f64,
    ) -> Result<f64, StoreError> {
        let raw_key = self.keys.key_for(key);
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;

        let field = entries
            .entry(raw_key)
            .or_default()
            .entry(payment_method.to_string())
            .or_insert(0.0);
        *field += amount;

        Ok(*field)
    }

    async fn scan(&self, patterns: &[String]) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;

        let matched: BTreeSet<String> = entries
            .keys()
            .filter(|key| patterns.iter().any(|pattern| glob_match(pattern, key)))
            .cloned()
            .collect();

        Ok(matched.into_iter().collect())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<HotFields>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;

        Ok(keys
            .iter()
            .map(|key| entries.get(key).cloned().unwrap_or_default())
            .collect())
    }

    fn key_design(&self) -> &KeyDesign {
        &self.keys
    }

    fn backend_type(&self) -> &'static str {
        "Memory"
    }
}
