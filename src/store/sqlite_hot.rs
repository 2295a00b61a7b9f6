//! SQLite-backed hot tier
//!
//! Shares the live counters between processes: the runtime writes them and
//! `stats_query` reads them from the same file. One row per
//! (key, payment_method); increments are a single UPSERT so concurrent
//! connections never lose an update.

use super::error::StoreError;
use super::hot::{HotFields, HotStore};
use super::keys::KeyDesign;
use crate::pipeline::types::AggregateKey;
use crate::sqlite_pragma::open_connection;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

const HOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hot_aggregates (
    key             TEXT NOT NULL,
    payment_method  TEXT NOT NULL,
    amount          REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (key, payment_method)
) WITHOUT ROWID;
"#;

/// Bound on host parameters per batch-read statement
const GET_MANY_CHUNK: usize = 500;

pub struct SqliteHotStore {
    conn: Arc<Mutex<Connection>>,
    keys: KeyDesign,
}

impl SqliteHotStore {
    /// Open (or create) the hot tier at `db_path`
    pub fn open(db_path: impl AsRef<Path>, keys: KeyDesign) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;
        Self::from_connection(conn, keys)
    }

    pub fn from_connection(conn: Connection, keys: KeyDesign) -> Result<Self, StoreError> {
        conn.execute_batch(HOT_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            keys,
        })
    }
}

#[async_trait]
impl HotStore for SqliteHotStore {
    async fn increment(
        &self,
        key: &AggregateKey,
        payment_method: &str,
        amount: f64,
    ) -> Result<f64, StoreError> {
        let raw_key = self.keys.key_for(key);
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let total = conn.query_row(
            "INSERT INTO hot_aggregates (key, payment_method, amount) VALUES (?1, ?2, ?3)
             ON CONFLICT(key, payment_method) DO UPDATE SET amount = amount + excluded.amount
             RETURNING amount",
            params![raw_key, payment_method, amount],
            |row| row.get(0),
        )?;

        Ok(total)
    }

    async fn scan(&self, patterns: &[String]) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT key FROM hot_aggregates WHERE key GLOB ?1")?;

        let mut matched = BTreeSet::new();
        for pattern in patterns {
            let rows = stmt.query_map([pattern], |row| row.get::<_, String>(0))?;
            for key in rows {
                matched.insert(key?);
            }
        }

        Ok(matched.into_iter().collect())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<HotFields>, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        // Chunks read from one snapshot
        let tx = conn.transaction()?;

        let mut by_key: BTreeMap<String, HotFields> = BTreeMap::new();
        for chunk in keys.chunks(GET_MANY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT key, payment_method, amount FROM hot_aggregates WHERE key IN ({})",
                placeholders
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?;

            for row in rows {
                let (key, method, amount) = row?;
                by_key.entry(key).or_default().insert(method, amount);
            }
        }
        tx.commit()?;

        Ok(keys
            .iter()
            .map(|key| by_key.get(key).cloned().unwrap_or_default())
            .collect())
    }

    fn key_design(&self) -> &KeyDesign {
        &self.keys
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
