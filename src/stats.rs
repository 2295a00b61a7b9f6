//! Request boundary for range queries
//!
//! Validates raw `from_date` / `to_date` parameters, then delegates to the
//! `QueryMerger`. Invalid input is rejected before either tier is touched.

use crate::pipeline::query::{MergedStats, QueryMerger, StatsTree, Tier};
use crate::pipeline::types::parse_day;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    InvalidDate { field: &'static str, value: String },
    InvalidRange { from: NaiveDate, to: NaiveDate },
}

impl StatsError {
    /// HTTP-style status for callers that expose this over a web boundary
    pub fn status_code(&self) -> u16 {
        match self {
            StatsError::InvalidDate { .. } => 422,
            StatsError::InvalidRange { .. } => 400,
        }
    }
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::InvalidDate { field, value } => {
                write!(f, "{} must be a YYYY-MM-DD date, got '{}'", field, value)
            }
            StatsError::InvalidRange { from, to } => {
                write!(f, "from_date ({}) must not be after to_date ({})", from, to)
            }
        }
    }
}

impl std::error::Error for StatsError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl StatsRequest {
    pub fn parse(from_date: &str, to_date: &str) -> Result<Self, StatsError> {
        let from = parse_day(from_date).map_err(|_| StatsError::InvalidDate {
            field: "from_date",
            value: from_date.to_string(),
        })?;
        let to = parse_day(to_date).map_err(|_| StatsError::InvalidDate {
            field: "to_date",
            value: to_date.to_string(),
        })?;

        if from > to {
            return Err(StatsError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResponse {
    pub data: StatsTree,
    /// True when at least one tier failed and its days are missing
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Tier>,
}

impl From<MergedStats> for StatsResponse {
    fn from(merged: MergedStats) -> Self {
        Self {
            partial: merged.is_partial(),
            data: merged.data,
            degraded: merged.degraded,
        }
    }
}

/// Validate, query both tiers, shape the response
pub async fn get_stats(
    merger: &QueryMerger,
    from_date: &str,
    to_date: &str,
) -> Result<StatsResponse, StatsError> {
    let request = StatsRequest::parse(from_date, to_date)?;
    let merged = merger.query(request.from, request.to).await;

    log::info!(
        "📈 Stats {}..{}: {} days ({} hot rows, {} cold rows{})",
        request.from,
        request.to,
        merged.data.len(),
        merged.hot_rows,
        merged.cold_rows,
        if merged.is_partial() { ", partial" } else { "" }
    );

    Ok(merged.into())
}
