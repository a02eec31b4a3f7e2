//! SQLite-based restore point store.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::restore::RestoreValue;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cursor {0} does not fit in a SQLite integer")]
    OutOfRange(u64),
}

/// SQLite restore point store.
pub struct CursorStore {
    conn: Connection,
}

impl CursorStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    ///
    /// `value` is declared without a type so SQLite keeps whatever was
    /// written; a non-integer surfaces as `RestoreValue::Invalid` on load.
    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS restore_points (
                name TEXT PRIMARY KEY,
                value,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Restore point schema initialized");
        Ok(())
    }

    /// Load the restore value saved under `name`.
    pub fn load(&self, name: &str) -> Result<Option<RestoreValue>, StoreError> {
        let value: Option<rusqlite::types::Value> = self
            .conn
            .query_row(
                "SELECT value FROM restore_points WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.map(RestoreValue::from))
    }

    /// Save a cursor under `name`, replacing any previous value.
    pub fn save(&self, name: &str, cursor: u64) -> Result<(), StoreError> {
        let value = i64::try_from(cursor).map_err(|_| StoreError::OutOfRange(cursor))?;
        let now = chrono::Utc::now().timestamp();

        self.conn.execute(
            r#"
            INSERT INTO restore_points (name, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![name, value, now],
        )?;

        debug!(restore_point = name, cursor, "Saved restore point");
        Ok(())
    }

    #[cfg(test)]
    fn save_raw(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO restore_points (name, value, updated_at) VALUES (?1, ?2, 0)",
            params![name, value],
        )?;
        Ok(())
    }
}

/// Save every new cursor value until the update stream closes.
///
/// SQLite writes run on the blocking pool. Returns the last cursor saved.
pub async fn persist_updates(
    mut store: CursorStore,
    name: String,
    mut updates: mpsc::Receiver<u64>,
) -> Option<u64> {
    let mut last_saved = None;

    while let Some(cursor) = updates.recv().await {
        if last_saved == Some(cursor) {
            continue;
        }

        let save_name = name.clone();
        let saved = tokio::task::spawn_blocking(move || {
            let result = store.save(&save_name, cursor);
            (store, result)
        })
        .await;

        let result = match saved {
            Ok((returned, result)) => {
                store = returned;
                result
            }
            Err(e) => {
                error!(firehose = %name, cursor, error = %e, "Cursor save task failed");
                return last_saved;
            }
        };

        match result {
            Ok(()) => last_saved = Some(cursor),
            Err(e) => warn!(firehose = %name, cursor, error = %e, "Failed to persist cursor"),
        }
    }

    info!(firehose = %name, cursor = ?last_saved, "Cursor persistence stopped");
    last_saved
}
