use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{StorageBackend, StorageError};

/// SQLite key/value backend with a byte quota over all stored values.
/// All operations are synchronous (rusqlite is blocking).
pub struct SqliteBackend {
    conn: Connection,
    quota: usize,
}

impl SqliteBackend {
    /// Open or create the store database at `db_path`.
    pub fn open(db_path: &Path, quota: usize) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("Failed to create data dir: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Backend(format!("Failed to open store db: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )
        .map_err(|e| StorageError::Backend(format!("Failed to create table: {}", e)))?;

        info!("Opened persistent store at {:?} (quota {} bytes)", db_path, quota);
        Ok(Self { conn, quota })
    }

    /// Bytes used by every key except `key`.
    fn used_excluding(&self, key: &str) -> Result<usize, StorageError> {
        let used: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
                 FROM kv_store WHERE key != ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Backend(format!("Failed to compute usage: {}", e)))?;
        Ok(used.max(0) as usize)
    }
}

impl StorageBackend for SqliteBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Backend(format!("Failed to read '{}': {}", key, e)))
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let available = self.quota.saturating_sub(self.used_excluding(key)?);
        let required = key.len() + value.len();
        if required > available {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                required,
                available,
            });
        }

        self.conn
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value],
            )
            .map_err(|e| StorageError::Backend(format!("Failed to write '{}': {}", key, e)))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .map_err(|e| StorageError::Backend(format!("Failed to remove '{}': {}", key, e)))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM kv_store", [])
            .map_err(|e| StorageError::Backend(format!("Failed to clear store: {}", e)))?;
        Ok(())
    }
}
