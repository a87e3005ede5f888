//! SQLite-backed hash store.

use super::traits::{FileHashRecord, HashStore};
use crate::error::{FetcherError, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// SQLite implementation of [`HashStore`].
///
/// Holds a single `file_hashes` table. Every trait call commits on its own;
/// `upsert_hash` wraps its insert and update in one immediate transaction.
pub struct SqliteHashStore {
    conn: Mutex<Connection>,
}

impl SqliteHashStore {
    /// Open (or create) the store at the specified database path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FetcherError::Io {
                message: format!("Failed to create store directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| FetcherError::Database {
            message: format!("Failed to open hash store {}: {}", db_path.display(), e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(|e| FetcherError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        debug!("Opened hash store at {}", db_path.display());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_hashes (
                filepath TEXT PRIMARY KEY,
                filehash TEXT,
                modelid INTEGER,
                modelversionid INTEGER
            );
            "#,
        )
        .map_err(|e| FetcherError::Database {
            message: format!("Failed to initialize hash store schema: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| FetcherError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileHashRecord> {
        let model_id: Option<i64> = row.get(2)?;
        let model_version_id: Option<i64> = row.get(3)?;
        Ok(FileHashRecord {
            path: row.get(0)?,
            content_hash: row.get(1)?,
            model_id: model_id.map(|id| id as u64),
            model_version_id: model_version_id.map(|id| id as u64),
        })
    }
}

impl HashStore for SqliteHashStore {
    fn get_all(&self) -> Result<BTreeMap<String, FileHashRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT filepath, filehash, modelid, modelversionid FROM file_hashes")
            .map_err(|e| FetcherError::Database {
                message: format!("Failed to prepare snapshot query: {}", e),
                source: Some(e),
            })?;

        let records = stmt
            .query_map([], Self::row_to_record)
            .map_err(|e| FetcherError::Database {
                message: format!("Failed to query hash store: {}", e),
                source: Some(e),
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect())
    }

    fn get(&self, path: &str) -> Result<Option<FileHashRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT filepath, filehash, modelid, modelversionid FROM file_hashes WHERE filepath = ?1",
            params![path],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| FetcherError::Database {
            message: format!("Failed to query {}: {}", path, e),
            source: Some(e),
        })
    }

    fn upsert_hash(&self, path: &str, hash: &str) -> Result<()> {
        let mut conn = self.lock()?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| FetcherError::Database {
                message: format!("Failed to begin upsert for {}: {}", path, e),
                source: Some(e),
            })?;

        tx.execute(
            "INSERT OR IGNORE INTO file_hashes (filepath) VALUES (?1)",
            params![path],
        )?;
        tx.execute(
            "UPDATE file_hashes SET filehash = ?1 WHERE filepath = ?2",
            params![hash, path],
        )?;

        tx.commit().map_err(|e| FetcherError::Database {
            message: format!("Failed to commit hash for {}: {}", path, e),
            source: Some(e),
        })?;

        debug!("Stored hash for {}", path);
        Ok(())
    }

    fn set_identity(&self, path: &str, model_id: u64, model_version_id: u64) -> Result<()> {
        let conn = self.lock()?;

        let updated = conn
            .execute(
                "UPDATE file_hashes SET modelid = ?1, modelversionid = ?2 WHERE filepath = ?3",
                params![model_id as i64, model_version_id as i64, path],
            )
            .map_err(|e| FetcherError::Database {
                message: format!("Failed to set identity for {}: {}", path, e),
                source: Some(e),
            })?;

        if updated == 0 {
            return Err(FetcherError::IntegrityViolation {
                path: path.to_string(),
                message: format!(
                    "no stored row to attach model {} / version {} to",
                    model_id, model_version_id
                ),
            });
        }

        debug!(
            "Stored identity for {}: model {} version {}",
            path, model_id, model_version_id
        );
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<bool> {
        let conn = self.lock()?;

        let deleted = conn
            .execute("DELETE FROM file_hashes WHERE filepath = ?1", params![path])
            .map_err(|e| FetcherError::Database {
                message: format!("Failed to remove {}: {}", path, e),
                source: Some(e),
            })?;

        Ok(deleted > 0)
    }
}
