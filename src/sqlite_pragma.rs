//! Shared SQLite connection tuning
//!
//! Every store opens its own connection and applies the same PRAGMAs so the
//! queue, hot tier and cold tier can live in one file or in separate files.

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Apply WAL + relaxed sync + busy timeout
///
/// - `journal_mode = WAL` lets the flusher write while queries read
/// - `synchronous = NORMAL` is durable across process crashes in WAL mode
/// - `wal_autocheckpoint = 1000` pages
/// - busy timeout of 5s so concurrent connections wait instead of failing
pub fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    // journal_mode and wal_autocheckpoint echo a row back
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    let _pages: i64 =
        conn.pragma_update_and_check(None, "wal_autocheckpoint", 1000, |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Open a connection, creating the parent directory if needed
pub fn open_connection(db_path: impl AsRef<Path>) -> Result<Connection, rusqlite::Error> {
    let db_path = db_path.as_ref();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!(
                    "⚠️  Failed to create database directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wal_and_checkpoint_configured() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.db");
        let conn = open_connection(&db_path).unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let checkpoint: i32 = conn
            .query_row("PRAGMA wal_autocheckpoint", [], |row| row.get(0))
            .unwrap();
        assert_eq!(checkpoint, 1000);
        assert!(db_path.exists());
    }
}
