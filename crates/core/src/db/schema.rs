//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "models and workspaces",
        r#"
        CREATE TABLE IF NOT EXISTS models (
            id          TEXT PRIMARY KEY,
            name        TEXT    NOT NULL DEFAULT '',
            version     INTEGER NOT NULL DEFAULT 1,
            cameras     TEXT    NOT NULL DEFAULT '{}',
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspaces (
            model_id      TEXT    NOT NULL REFERENCES models (id) ON DELETE CASCADE,
            user_id       TEXT    NOT NULL,
            generation    TEXT    NOT NULL,
            version       INTEGER NOT NULL,
            base_version  INTEGER NOT NULL,
            cameras       TEXT    NOT NULL DEFAULT '{}',
            base_cameras  TEXT    NOT NULL DEFAULT '{}',
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL,
            PRIMARY KEY (model_id, user_id),
            CHECK (base_version <= version)
        );
        "#,
    ),
    (
        2,
        "merge log",
        r#"
        CREATE TABLE IF NOT EXISTS merge_log (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id       TEXT    NOT NULL,
            user_id        TEXT    NOT NULL,
            action         TEXT    NOT NULL,
            model_version  INTEGER,
            conflicts      INTEGER NOT NULL DEFAULT 0,
            details        TEXT,
            created_at     TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_merge_log_model_id ON merge_log (model_id);
        CREATE INDEX IF NOT EXISTS idx_merge_log_created_at ON merge_log (created_at);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
