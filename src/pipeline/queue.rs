//! Durable FIFO hand-off between the producer and the aggregator
//!
//! Table written (created on open):
//! - `transaction_queue` - append on push, delete-returning on pop
//!
//! Several named queues can share one table. Delivery is at-least-once:
//! an item popped by a consumer that crashes before applying it is lost,
//! and nothing is deduplicated.

use crate::sqlite_pragma::open_connection;
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_queue (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    queue        TEXT NOT NULL,
    payload      TEXT NOT NULL,
    enqueued_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transaction_queue_queue_id
    ON transaction_queue (queue, id);
"#;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait TransactionQueue: Send + Sync {
    async fn push(&self, payload: &str) -> Result<(), StoreError>;

    /// Pop the oldest item, waiting up to `wait`
    ///
    /// `Ok(None)` means the queue stayed empty for the whole wait.
    async fn pop_timeout(&self, wait: Duration) -> Result<Option<String>, StoreError>;

    /// Current depth
    async fn len(&self) -> Result<u64, StoreError>;
}

pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
    name: String,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub fn open(db_path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;
        Self::from_connection(conn, name)
    }

    pub fn from_connection(conn: Connection, name: impl Into<String>) -> Result<Self, StoreError> {
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            name: name.into(),
            notify: Arc::new(Notify::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// How often an idle pop re-checks the table for items pushed by
    /// another connection
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn try_pop(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let payload = conn
            .query_row(
                "DELETE FROM transaction_queue
                 WHERE id = (SELECT MIN(id) FROM transaction_queue WHERE queue = ?1)
                 RETURNING payload",
                params![self.name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(payload)
    }
}

#[async_trait]
impl TransactionQueue for SqliteQueue {
    async fn push(&self, payload: &str) -> Result<(), StoreError> {
        {
            let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            conn.execute(
                "INSERT INTO transaction_queue (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                params![self.name, payload, Utc::now().timestamp_millis()],
            )?;
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn pop_timeout(&self, wait: Duration) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(payload) = self.try_pop()? {
                return Ok(Some(payload));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // Woken early by an in-process push; otherwise re-poll
            let _ = timeout((deadline - now).min(self.poll_interval), self.notify.notified()).await;
        }
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let depth: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transaction_queue WHERE queue = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(depth.max(0) as u64)
    }
}
