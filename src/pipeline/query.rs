//! Query merger: answers a day range from both tiers
//!
//! The range is split once at the cutoff day. Days on or after it come from
//! the hot tier, earlier days from the cold tier, so no (day, type) is ever
//! counted twice. A tier that fails contributes nothing and is reported in
//! `MergedStats::degraded`.

use super::cutoff::{
    cutoff_day, resolve_cutoff, split_range, today_midnight_utc, CutoffOffset, DayRange,
};
use super::types::{format_day, DailyAggregate};
use crate::store::{scan_aggregates, ColdStore, HotStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Hot ranges longer than this are served by one full-prefix scan filtered
/// in memory instead of one pattern per day
const MAX_PER_DAY_PATTERNS: usize = 366;

/// `{day: {type: {payment_method: amount}}}`
pub type StatsTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedStats {
    pub data: StatsTree,
    /// Tiers whose fetch failed; their days are missing from `data`
    pub degraded: Vec<Tier>,
    pub hot_rows: usize,
    pub cold_rows: usize,
}

impl MergedStats {
    pub fn is_partial(&self) -> bool {
        !self.degraded.is_empty()
    }
}

pub struct QueryMerger {
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    offset: CutoffOffset,
}

impl QueryMerger {
    pub fn new(hot: Arc<dyn HotStore>, cold: Arc<dyn ColdStore>, offset: CutoffOffset) -> Self {
        Self { hot, cold, offset }
    }

    /// Merge `[from, to]` using today's cutoff
    pub async fn query(&self, from: NaiveDate, to: NaiveDate) -> MergedStats {
        self.query_at(from, to, today_midnight_utc()).await
    }

    /// Merge `[from, to]` as if today's midnight were `now_midnight`
    pub async fn query_at(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        now_midnight: DateTime<Utc>,
    ) -> MergedStats {
        let cutoff = cutoff_day(resolve_cutoff(now_midnight, &self.offset));
        let split = split_range(from, to, cutoff);
        log::debug!(
            "🔀 Query {}..{} (cutoff day {}): hot={:?} cold={:?}",
            from,
            to,
            cutoff,
            split.hot,
            split.cold
        );

        let (hot, cold) = tokio::join!(
            async {
                match split.hot {
                    Some(range) => Some(self.fetch_hot(range).await),
                    None => None,
                }
            },
            async {
                match split.cold {
                    Some(range) => Some(self.cold.range(range.from, range.to).await),
                    None => None,
                }
            }
        );

        let mut merged = MergedStats::default();
        if let Some(result) = hot {
            merged.hot_rows = merge_branch(&mut merged, Tier::Hot, result);
        }
        if let Some(result) = cold {
            merged.cold_rows = merge_branch(&mut merged, Tier::Cold, result);
        }
        merged
    }

    async fn fetch_hot(&self, range: DayRange) -> Result<Vec<DailyAggregate>, StoreError> {
        let design = self.hot.key_design();
        let day_count = (range.to - range.from).num_days() as usize + 1;

        if day_count > MAX_PER_DAY_PATTERNS {
            let all = scan_aggregates(self.hot.as_ref(), &[design.all_keys_pattern()]).await?;
            return Ok(all
                .into_iter()
                .filter(|agg| agg.day >= range.from && agg.day <= range.to)
                .collect());
        }

        let patterns: Vec<String> =
            range.days().map(|day| design.pattern(Some(day), None)).collect();
        scan_aggregates(self.hot.as_ref(), &patterns).await
    }
}

fn merge_branch(
    merged: &mut MergedStats,
    tier: Tier,
    result: Result<Vec<DailyAggregate>, StoreError>,
) -> usize {
    match result {
        Ok(rows) => {
            let count = rows.len();
            for agg in rows {
                merged
                    .data
                    .entry(format_day(agg.day))
                    .or_default()
                    .insert(agg.tx_type.as_str().to_string(), agg.total_amount);
            }
            count
        }
        Err(e) => {
            log::warn!("⚠️  {} tier unavailable, returning partial result: {}", tier, e);
            merged.degraded.push(tier);
            0
        }
    }
}
