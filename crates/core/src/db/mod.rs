//! SQLite persistence layer for camsync.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and query helpers for models, workspaces and the merge log.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// Busy timeout used by [`Database::new`].
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Main database handle wrapping a SQLite connection.
///
/// The connection is opened in WAL mode for concurrent-read performance and
/// uses `PRAGMA foreign_keys = ON`. The inner connection is wrapped in a
/// `Mutex` so that `Database` is `Send + Sync`, enabling use inside `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` with the default busy
    /// timeout.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Open (or create) a SQLite database at `path`.
    ///
    /// Other processes holding the write lock are waited on for up to
    /// `busy_timeout_ms` before a statement fails with `SQLITE_BUSY`.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout_ms: u64) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), busy_timeout_ms, "opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", busy_timeout_ms))?;

        debug!("database opened successfully with WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// Prefer using the typed query methods on [`Database`] over raw SQL
    /// whenever possible.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside an `IMMEDIATE` SQLite transaction. If the
    /// closure returns `Ok`, the transaction is committed; otherwise it is
    /// rolled back.
    ///
    /// The write lock is taken up front, so reads inside the closure see the
    /// state that the closure's writes will be applied to.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("camsync.db");
        let db = Database::open(&path, 250).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());

        let timeout: i64 = db
            .conn()
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 250);
    }

    #[test]
    fn test_transaction_commit() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| {
            conn.execute(
                "INSERT INTO models (id, name, version, cameras, created_at, updated_at)
                 VALUES (?1, ?2, 1, '{}', ?3, ?3)",
                rusqlite::params!["m1", "demo", "2025-01-01T00:00:00Z"],
            )?;
            Ok(())
        })
        .unwrap();

        let name: String = db
            .conn()
            .query_row(
                "SELECT name FROM models WHERE id = ?1",
                rusqlite::params!["m1"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "demo");
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO models (id, name, version, cameras, created_at, updated_at)
                 VALUES (?1, ?2, 1, '{}', ?3, ?3)",
                rusqlite::params!["rollback", "demo", "2025-01-01T00:00:00Z"],
            )?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM models WHERE id = ?1",
                rusqlite::params!["rollback"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
