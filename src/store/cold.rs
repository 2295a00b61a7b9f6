//! Cold tier: durable per-day aggregate documents
//!
//! Table written (created on open):
//! - `daily_aggregates` - one row per (day, tx_type), UPSERT by the flusher only
//!
//! `total_amount` is stored as JSON object text. Serialization goes through a
//! `BTreeMap`, so an unchanged snapshot produces identical text and the
//! UPSERT leaves the row (including `last_updated`) untouched.

use super::error::StoreError;
use crate::pipeline::types::{format_day, parse_day, DailyAggregate, ParseError, TransactionType};
use crate::sqlite_pragma::open_connection;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

const COLD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS daily_aggregates (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    day             TEXT NOT NULL
                    CHECK (day GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'),
    tx_type         TEXT NOT NULL CHECK (tx_type IN ('deposits', 'withdrawals')),
    total_amount    TEXT NOT NULL,
    last_updated    TEXT NOT NULL,
    UNIQUE (day, tx_type)
);

CREATE INDEX IF NOT EXISTS idx_daily_aggregates_type_day
    ON daily_aggregates (tx_type, day);
"#;

/// Outcome of one `bulk_upsert`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

impl fmt::Display for UpsertSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} unchanged",
            self.inserted, self.updated, self.unchanged
        )
    }
}

#[async_trait]
pub trait ColdStore: Send + Sync {
    /// All documents with `from <= day <= to`, ordered by (day, tx_type)
    async fn range(&self, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<DailyAggregate>, StoreError>;

    /// Insert or wholesale-replace each document, matched on (day, tx_type)
    ///
    /// Runs in one transaction. `last_updated` is set to `now` only on rows
    /// whose `total_amount` actually changed.
    async fn bulk_upsert(
        &self,
        docs: &[DailyAggregate],
        now: DateTime<Utc>,
    ) -> Result<UpsertSummary, StoreError>;

    fn backend_type(&self) -> &'static str;
}

pub struct SqliteColdStore {
    conn: Arc<Mutex<Connection>>,
}

/// Raw column values before mapping into the data model
type ColdRow = (String, String, String, String);

impl SqliteColdStore {
    /// Open (or create) the cold tier and bootstrap its schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(COLD_SCHEMA)?;
        log::debug!("🗄️  Cold tier schema ready (daily_aggregates)");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Point lookup of one document
    pub fn get(
        &self,
        day: NaiveDate,
        tx_type: TransactionType,
    ) -> Result<Option<DailyAggregate>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let row: Option<ColdRow> = conn
            .query_row(
                "SELECT day, tx_type, total_amount, last_updated
                 FROM daily_aggregates WHERE day = ?1 AND tx_type = ?2",
                params![format_day(day), tx_type.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(map_row).transpose()
    }

    /// Distinct days present, ascending
    pub fn days(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT DISTINCT day FROM daily_aggregates ORDER BY day")?;

        let raw: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        raw.iter()
            .map(|day| parse_day(day).map_err(|e| StoreError::Corrupt(e.to_string())))
            .collect()
    }

    /// Sum of one payment method across `[from, to]`, optionally for one type
    pub fn total_by_payment_method(
        &self,
        payment_method: &str,
        from: NaiveDate,
        to: NaiveDate,
        tx_type: Option<TransactionType>,
    ) -> Result<f64, StoreError> {
        let docs = self.read_range(from, to)?;

        Ok(docs
            .iter()
            .filter(|doc| tx_type.map_or(true, |t| doc.tx_type == t))
            .filter_map(|doc| doc.total_amount.get(payment_method))
            .sum())
    }

    fn read_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare_cached(
            "SELECT day, tx_type, total_amount, last_updated
             FROM daily_aggregates
             WHERE day >= ?1 AND day <= ?2
             ORDER BY day ASC, tx_type ASC",
        )?;

        let rows: Vec<ColdRow> = stmt
            .query_map(params![format_day(from), format_day(to)], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter().map(map_row).collect()
    }
}

fn map_row(
    (day, tx_type, total_amount, last_updated): ColdRow,
) -> Result<DailyAggregate, StoreError> {
    let day = parse_day(&day).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let tx_type: TransactionType = tx_type
        .parse()
        .map_err(|e: ParseError| StoreError::Corrupt(e.to_string()))?;
    let total_amount: BTreeMap<String, f64> = serde_json::from_str(&total_amount)?;
    let last_updated = DateTime::parse_from_rfc3339(&last_updated)
        .map_err(|e| StoreError::Corrupt(format!("last_updated {}: {}", last_updated, e)))?
        .with_timezone(&Utc);

    Ok(DailyAggregate {
        day,
        tx_type,
        total_amount,
        last_updated: Some(last_updated),
    })
}

#[async_trait]
impl ColdStore for SqliteColdStore {
    async fn range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, StoreError> {
        self.read_range(from, to)
    }

    async fn bulk_upsert(
        &self,
        docs: &[DailyAggregate],
        now: DateTime<Utc>,
    ) -> Result<UpsertSummary, StoreError> {
        let mut summary = UpsertSummary::default();
        if docs.is_empty() {
            return Ok(summary);
        }

        let now = now.to_rfc3339();
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        // Take the write lock up front; a deferred read cannot be upgraded
        // once another connection on the same file has committed.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut existing_stmt = tx.prepare_cached(
                "SELECT total_amount FROM daily_aggregates WHERE day = ?1 AND tx_type = ?2",
            )?;
            let mut upsert_stmt = tx.prepare_cached(
                "INSERT INTO daily_aggregates (day, tx_type, total_amount, last_updated)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(day, tx_type) DO UPDATE SET
                     total_amount = excluded.total_amount,
                     last_updated = excluded.last_updated
                 WHERE daily_aggregates.total_amount IS NOT excluded.total_amount",
            )?;

            for doc in docs {
                let day = format_day(doc.day);
                let totals = serde_json::to_string(&doc.total_amount)?;

                let existing: Option<String> = existing_stmt
                    .query_row(params![day, doc.tx_type.as_str()], |row| row.get(0))
                    .optional()?;

                match existing {
                    None => summary.inserted += 1,
                    Some(ref stored) if *stored == totals => {
                        summary.unchanged += 1;
                        continue;
                    }
                    Some(_) => summary.updated += 1,
                }

                upsert_stmt.execute(params![day, doc.tx_type.as_str(), totals, now])?;
            }
        }
        tx.commit()?;

        Ok(summary)
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
