//! Durable store (component E): a single SQLite database per project.
//!
//! WAL mode, foreign keys with cascade delete, an FTS5 virtual table kept
//! in sync by triggers, and a `meta` key-value table (also
//! trigger-maintained) recording `memories_last_modified` /
//! `rules_last_modified` so callers can detect external writes.

pub mod entities;
pub mod graph;
pub mod memories;
mod migrations;
pub mod rules;
pub mod sessions;
pub mod triggers;

pub use migrations::SCHEMA_VERSION;

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Directory name holding a project's relational store and vector index.
pub const STORAGE_DIR_NAME: &str = ".claude-memory/storage";
/// Legacy directory name migrated from on first open.
const LEGACY_STORAGE_DIR_NAME: &str = ".devilmcp/storage";
/// Filename of the main relational database file.
const DB_FILE_NAME: &str = "memory.db";

/// A single project's durable store: one SQLite connection, guarded by a
/// mutex matching the "multiple readers, one writer" concurrency model
/// (readers and the writer all funnel through this handle; WAL mode lets
/// SQLite itself serve concurrent readers without blocking on the mutex
/// for read-only statements executed elsewhere via a second connection if
/// ever added).
pub struct Store {
    conn: Mutex<Connection>,
    root: PathBuf,
}

impl Store {
    /// Opens (creating if necessary) the store for a project rooted at
    /// `project_path`, running any pending migrations and, if present,
    /// copying forward a legacy `.devilmcp/storage` database.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the directory cannot be created or the
    /// connection cannot be opened, or `Error::Fatal` if the on-disk schema
    /// version is newer than any migration this build knows about.
    pub fn open(project_path: &Path) -> Result<Self> {
        let storage_dir = project_path.join(STORAGE_DIR_NAME);
        std::fs::create_dir_all(&storage_dir).map_err(|e| Error::Store {
            operation: "create_storage_dir".to_string(),
            cause: e.to_string(),
        })?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        migrate_legacy_directory(project_path, &db_path);

        let conn = Connection::open(&db_path).map_err(|e| Error::Store {
            operation: "open_connection".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn)?;
        migrations::apply(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            root: storage_dir,
        })
    }

    /// Opens an in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the in-memory connection cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store {
            operation: "open_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn)?;
        migrations::apply(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            root: PathBuf::new(),
        })
    }

    /// Directory this store's files live under (`<project>/.claude-memory/storage`).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Fatal("store connection lock poisoned".to_string()))
    }

    /// Runs `f` inside a single SQL transaction: `BEGIN IMMEDIATE`, then
    /// `COMMIT` if `f` succeeds or `ROLLBACK` if it errors, so a compound
    /// write (row insert plus version row, or a compaction's summary insert
    /// plus per-candidate supersede-and-archive) either lands wholly or not
    /// at all.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the transaction cannot be started or
    /// committed, otherwise whatever `f` returns.
    pub(crate) fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        conn.execute("BEGIN IMMEDIATE", []).map_err(store_err("begin_transaction"))?;
        let result = f(&conn);
        if result.is_ok() {
            conn.execute("COMMIT", []).map_err(store_err("commit_transaction"))?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    /// Reads a `meta` value by key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a query failure.
    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .map(Some)
            .or_else(|e| {
                if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                    Ok(None)
                } else {
                    Err(Error::Store {
                        operation: "meta_get".to_string(),
                        cause: e.to_string(),
                    })
                }
            })
    }

    /// Writes (or replaces) a `meta` value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` on a write failure.
    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )
        .map_err(|e| Error::Store {
            operation: "meta_set".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").map_err(store_err("pragma_journal_mode"))?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(store_err("pragma_foreign_keys"))?;
    conn.pragma_update(None, "busy_timeout", 5000).map_err(store_err("pragma_busy_timeout"))?;
    Ok(())
}

fn store_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::Store {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// Copies a legacy `.devilmcp/storage/memory.db` forward to the new
/// `.claude-memory/storage/memory.db` location if the new file does not
/// yet exist. Never deletes the legacy directory: per the engine's design
/// notes, whether to remove it is left to the operator.
fn migrate_legacy_directory(project_path: &Path, new_db_path: &Path) {
    if new_db_path.exists() {
        return;
    }
    let legacy_db = project_path.join(LEGACY_STORAGE_DIR_NAME).join(DB_FILE_NAME);
    if legacy_db.exists() {
        let _ = std::fs::copy(&legacy_db, new_db_path);
    }
}

pub(crate) use store_err as map_store_err;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.meta_set("memories_last_modified", "123").unwrap();
        assert_eq!(
            store.meta_get("memories_last_modified").unwrap(),
            Some("123".to_string())
        );
        assert_eq!(store.meta_get("nonexistent_key").unwrap(), None);
    }

    #[test]
    fn transaction_rolls_back_every_statement_on_error() {
        let store = Store::open_in_memory().unwrap();
        store.meta_set("marker", "before").unwrap();
        let result: Result<()> = store.transaction(|conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('marker', 'during')
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [],
            )
            .map_err(store_err("test_update"))?;
            Err(Error::Validation("fail on purpose".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.meta_get("marker").unwrap(), Some("before".to_string()));
    }

    #[test]
    fn legacy_directory_is_copied_once_and_never_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let legacy_dir = dir.path().join(".devilmcp/storage");
        std::fs::create_dir_all(&legacy_dir).unwrap();
        {
            let legacy_conn = Connection::open(legacy_dir.join("memory.db")).unwrap();
            legacy_conn
                .execute("CREATE TABLE marker (id INTEGER)", [])
                .unwrap();
        }

        let store = Store::open(dir.path()).unwrap();
        assert!(legacy_dir.join("memory.db").exists(), "legacy file must survive");
        assert!(store.root().join("memory.db").exists());
    }
}
