//! Typed query helpers for every table in the camsync database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::fields::non_finite_field;
use crate::models::{CameraCollection, CameraRecord, Fields, MergeAction, Model, Workspace};
use crate::store::{MergeCommit, MergeLogRecord, MergeStore, ModelStore, WorkspaceStore};

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `merge_log` table.
#[derive(Debug, Clone)]
pub struct MergeLogEntry {
    pub id: i64,
    pub model_id: String,
    pub user_id: String,
    pub action: String,
    pub model_version: Option<i64>,
    pub conflicts: i64,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MergeLogEntry {
    /// The parsed action, or `None` for rows written by a newer schema.
    pub fn action(&self) -> Option<MergeAction> {
        MergeAction::from_str_val(&self.action)
    }
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- models -------------------------------------------------------------

    /// Insert a new model at version 1.
    pub fn insert_model(
        &self,
        name: &str,
        cameras: &CameraCollection,
    ) -> Result<Model, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let encoded = encode_cameras(cameras)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO models (id, name, version, cameras, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4, ?4)",
            params![id.to_string(), name, encoded, now],
        )?;
        info!(model_id = %id, name, cameras = cameras.len(), "inserted model");
        Ok(Model {
            id,
            name: name.to_string(),
            version: 1,
            cameras: cameras.clone(),
        })
    }

    /// Get a model by ID (returns an error if not found).
    pub fn get_model_entry(&self, model_id: Uuid, fields: Fields) -> Result<Model, DatabaseError> {
        let conn = self.conn();
        read_model(&conn, model_id, fields)
    }

    /// Get a model by ID, returning `Option` instead of an error on not-found.
    pub fn get_model(&self, model_id: Uuid, fields: Fields) -> Result<Option<Model>, DatabaseError> {
        match self.get_model_entry(model_id, fields) {
            Ok(model) => Ok(Some(model)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace a model's cameras if it is still at `expected_version`.
    pub fn replace_model_cameras(
        &self,
        model_id: Uuid,
        cameras: &CameraCollection,
        expected_version: i64,
    ) -> Result<i64, DatabaseError> {
        self.transaction(|conn| bump_model(conn, model_id, cameras, expected_version))
    }

    // -- workspaces ---------------------------------------------------------

    /// Fork the model's current cameras into a new workspace for `user_id`.
    pub fn create_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<Workspace, DatabaseError> {
        self.transaction(|conn| {
            if workspace_stamp(conn, model_id, user_id)?.is_some() {
                return Err(DatabaseError::AlreadyExists {
                    model_id: model_id.to_string(),
                    user_id: user_id.to_string(),
                });
            }

            let model = read_model(conn, model_id, Fields::CAMERAS)?;
            let generation = Uuid::new_v4();
            let now = Utc::now();
            let encoded = encode_cameras(&model.cameras)?;
            conn.execute(
                "INSERT INTO workspaces
                 (model_id, user_id, generation, version, base_version, cameras, base_cameras,
                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5, ?6, ?6)",
                params![
                    model_id.to_string(),
                    user_id.to_string(),
                    generation.to_string(),
                    model.version,
                    encoded,
                    now.to_rfc3339()
                ],
            )?;

            info!(
                model_id = %model_id,
                user_id = %user_id,
                version = model.version,
                "created workspace"
            );
            Ok(Workspace {
                model_id,
                user_id,
                generation,
                version: model.version,
                base_version: model.version,
                cameras: model.cameras.clone(),
                base_cameras: model.cameras,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a workspace (returns an error if not found).
    pub fn get_workspace_entry(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        fields: Fields,
    ) -> Result<Workspace, DatabaseError> {
        let conn = self.conn();
        read_workspace(&conn, model_id, user_id, fields)
    }

    /// Get a workspace, returning `Option` instead of an error on not-found.
    pub fn get_workspace(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        fields: Fields,
    ) -> Result<Option<Workspace>, DatabaseError> {
        match self.get_workspace_entry(model_id, user_id, fields) {
            Ok(ws) => Ok(Some(ws)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a workspace. Returns whether a row was removed.
    pub fn delete_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM workspaces WHERE model_id = ?1 AND user_id = ?2",
            params![model_id.to_string(), user_id.to_string()],
        )?;
        debug!(model_id = %model_id, user_id = %user_id, deleted = rows > 0, "deleted workspace");
        Ok(rows > 0)
    }

    /// Overwrite a workspace's state and mark it pristine at `base_version`.
    pub fn replace_workspace_cameras(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        cameras: &CameraCollection,
        base_cameras: &CameraCollection,
        base_version: i64,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE workspaces
             SET cameras = ?3, base_cameras = ?4, version = ?5, base_version = ?5, updated_at = ?6
             WHERE model_id = ?1 AND user_id = ?2",
            params![
                model_id.to_string(),
                user_id.to_string(),
                encode_cameras(cameras)?,
                encode_cameras(base_cameras)?,
                base_version,
                Utc::now().to_rfc3339()
            ],
        )?;
        if rows == 0 {
            return Err(workspace_not_found(model_id, user_id));
        }
        Ok(())
    }

    /// Insert or replace one camera in a workspace, returning the bumped
    /// workspace version.
    pub fn upsert_workspace_camera(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        camera_id: &str,
        camera: &CameraRecord,
    ) -> Result<i64, DatabaseError> {
        self.transaction(|conn| {
            let mut ws = read_workspace(conn, model_id, user_id, Fields::CAMERAS)?;
            ws.cameras.insert(camera_id.to_string(), camera.clone());
            let version = write_workspace_edit(conn, &ws)?;
            debug!(model_id = %model_id, user_id = %user_id, camera_id, version, "upserted camera");
            Ok(version)
        })
    }

    /// Remove one camera from a workspace.
    ///
    /// Returns the bumped workspace version, or `None` (and no bump) when the
    /// camera was not there.
    pub fn remove_workspace_camera(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        camera_id: &str,
    ) -> Result<Option<i64>, DatabaseError> {
        self.transaction(|conn| {
            let mut ws = read_workspace(conn, model_id, user_id, Fields::CAMERAS)?;
            if ws.cameras.remove(camera_id).is_none() {
                return Ok(None);
            }
            let version = write_workspace_edit(conn, &ws)?;
            debug!(model_id = %model_id, user_id = %user_id, camera_id, version, "removed camera");
            Ok(Some(version))
        })
    }

    // -- merge commits ------------------------------------------------------

    /// Publish merged cameras to the model and update the workspace in one
    /// transaction, guarded by both versions.
    pub fn commit_merge(&self, commit: &MergeCommit) -> Result<i64, DatabaseError> {
        let (
            model_id,
            user_id,
            expected_model_version,
            expected_generation,
            expected_workspace_version,
            cameras,
        ) = match commit {
            MergeCommit::Publish {
                model_id,
                user_id,
                expected_model_version,
                expected_generation,
                expected_workspace_version,
                cameras,
            }
            | MergeCommit::Finalize {
                model_id,
                user_id,
                expected_model_version,
                expected_generation,
                expected_workspace_version,
                cameras,
            } => (
                *model_id,
                *user_id,
                *expected_model_version,
                *expected_generation,
                *expected_workspace_version,
                cameras,
            ),
        };

        self.transaction(|conn| {
            let (generation, actual) = workspace_stamp(conn, model_id, user_id)?
                .ok_or_else(|| workspace_not_found(model_id, user_id))?;
            if generation != expected_generation {
                return Err(DatabaseError::WorkspaceReplaced {
                    id: workspace_key(model_id, user_id),
                });
            }
            if actual != expected_workspace_version {
                return Err(DatabaseError::VersionConflict {
                    entity: "workspace".into(),
                    id: workspace_key(model_id, user_id),
                    expected: expected_workspace_version,
                    actual,
                });
            }

            let new_version = bump_model(conn, model_id, cameras, expected_model_version)?;

            match commit {
                MergeCommit::Publish { .. } => {
                    conn.execute(
                        "UPDATE workspaces
                         SET cameras = ?3, base_cameras = ?3, version = ?4, base_version = ?4,
                             updated_at = ?5
                         WHERE model_id = ?1 AND user_id = ?2",
                        params![
                            model_id.to_string(),
                            user_id.to_string(),
                            encode_cameras(cameras)?,
                            new_version,
                            Utc::now().to_rfc3339()
                        ],
                    )?;
                }
                MergeCommit::Finalize { .. } => {
                    conn.execute(
                        "DELETE FROM workspaces WHERE model_id = ?1 AND user_id = ?2",
                        params![model_id.to_string(), user_id.to_string()],
                    )?;
                }
            }

            info!(
                model_id = %model_id,
                user_id = %user_id,
                version = new_version,
                finalize = matches!(commit, MergeCommit::Finalize { .. }),
                "committed merge"
            );
            Ok(new_version)
        })
    }

    // -- merge_log ----------------------------------------------------------

    /// Append a merge log entry.
    pub fn insert_merge_log(&self, record: &MergeLogRecord) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO merge_log
             (model_id, user_id, action, model_version, conflicts, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.model_id.to_string(),
                record.user_id.to_string(),
                record.action.to_string(),
                record.model_version,
                record.conflicts as i64,
                record.details,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %record.action, "inserted merge_log entry");
        Ok(id)
    }

    /// Return the most recent `limit` merge log entries, newest first,
    /// optionally restricted to one model.
    pub fn list_merge_log(
        &self,
        model_id: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<MergeLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, model_id, user_id, action, model_version, conflicts, details, created_at
             FROM merge_log
             WHERE (?1 IS NULL OR model_id = ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![model_id.map(|id| id.to_string()), limit], |row| {
                let created_at: String = row.get(7)?;
                Ok(MergeLogEntry {
                    id: row.get(0)?,
                    model_id: row.get(1)?,
                    user_id: row.get(2)?,
                    action: row.get(3)?,
                    model_version: row.get(4)?,
                    conflicts: row.get(5)?,
                    details: row.get(6)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Store trait implementations
// ---------------------------------------------------------------------------

impl ModelStore for Database {
    fn get_model(&self, model_id: Uuid, fields: Fields) -> Result<Option<Model>, DatabaseError> {
        Database::get_model(self, model_id, fields)
    }

    fn replace_model_cameras(
        &self,
        model_id: Uuid,
        cameras: &CameraCollection,
        expected_version: i64,
    ) -> Result<i64, DatabaseError> {
        Database::replace_model_cameras(self, model_id, cameras, expected_version)
    }
}

impl WorkspaceStore for Database {
    fn get_workspace(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        fields: Fields,
    ) -> Result<Option<Workspace>, DatabaseError> {
        Database::get_workspace(self, model_id, user_id, fields)
    }

    fn create_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<Workspace, DatabaseError> {
        Database::create_workspace(self, model_id, user_id)
    }

    fn delete_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
        Database::delete_workspace(self, model_id, user_id)
    }

    fn replace_workspace_cameras(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        cameras: &CameraCollection,
        base_cameras: &CameraCollection,
        base_version: i64,
    ) -> Result<(), DatabaseError> {
        Database::replace_workspace_cameras(
            self,
            model_id,
            user_id,
            cameras,
            base_cameras,
            base_version,
        )
    }
}

impl MergeStore for Database {
    fn commit(&self, commit: &MergeCommit) -> Result<i64, DatabaseError> {
        self.commit_merge(commit)
    }

    fn record_merge(&self, record: &MergeLogRecord) -> Result<(), DatabaseError> {
        self.insert_merge_log(record).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers, usable inside a transaction
// ---------------------------------------------------------------------------

fn read_model(conn: &Connection, model_id: Uuid, fields: Fields) -> Result<Model, DatabaseError> {
    let (name, version, cameras): (String, i64, String) = conn
        .query_row(
            "SELECT name, version, CASE WHEN ?2 THEN cameras ELSE '{}' END
             FROM models WHERE id = ?1",
            params![model_id.to_string(), fields.cameras],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity: "model".into(),
                id: model_id.to_string(),
            },
            other => other.into(),
        })?;

    Ok(Model {
        id: model_id,
        name,
        version,
        cameras: decode_cameras(&cameras)?,
    })
}

fn read_workspace(
    conn: &Connection,
    model_id: Uuid,
    user_id: Uuid,
    fields: Fields,
) -> Result<Workspace, DatabaseError> {
    let row: (i64, i64, String, String, String, String, Uuid) = conn
        .query_row(
            "SELECT version, base_version,
                    CASE WHEN ?3 THEN cameras ELSE '{}' END,
                    CASE WHEN ?4 THEN base_cameras ELSE '{}' END,
                    created_at, updated_at, generation
             FROM workspaces WHERE model_id = ?1 AND user_id = ?2",
            params![
                model_id.to_string(),
                user_id.to_string(),
                fields.cameras,
                fields.base_cameras
            ],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    uuid_column(row, 6)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => workspace_not_found(model_id, user_id),
            other => other.into(),
        })?;

    let (version, base_version, cameras, base_cameras, created_at, updated_at, generation) = row;
    Ok(Workspace {
        model_id,
        user_id,
        generation,
        version,
        base_version,
        cameras: decode_cameras(&cameras)?,
        base_cameras: decode_cameras(&base_cameras)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// The generation and version of a workspace, if it exists.
fn workspace_stamp(
    conn: &Connection,
    model_id: Uuid,
    user_id: Uuid,
) -> Result<Option<(Uuid, i64)>, DatabaseError> {
    let stamp = conn
        .query_row(
            "SELECT generation, version FROM workspaces WHERE model_id = ?1 AND user_id = ?2",
            params![model_id.to_string(), user_id.to_string()],
            |row| Ok((uuid_column(row, 0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(stamp)
}

fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Store the edited `cameras` of `ws` and bump its version by one.
fn write_workspace_edit(conn: &Connection, ws: &Workspace) -> Result<i64, DatabaseError> {
    conn.execute(
        "UPDATE workspaces SET cameras = ?3, version = version + 1, updated_at = ?4
         WHERE model_id = ?1 AND user_id = ?2",
        params![
            ws.model_id.to_string(),
            ws.user_id.to_string(),
            encode_cameras(&ws.cameras)?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(ws.version + 1)
}

/// Conditional model update: succeeds only while the stored version equals
/// `expected_version`.
fn bump_model(
    conn: &Connection,
    model_id: Uuid,
    cameras: &CameraCollection,
    expected_version: i64,
) -> Result<i64, DatabaseError> {
    let rows = conn.execute(
        "UPDATE models SET cameras = ?2, version = version + 1, updated_at = ?3
         WHERE id = ?1 AND version = ?4",
        params![
            model_id.to_string(),
            encode_cameras(cameras)?,
            Utc::now().to_rfc3339(),
            expected_version
        ],
    )?;

    if rows == 0 {
        let actual: Option<i64> = conn
            .query_row(
                "SELECT version FROM models WHERE id = ?1",
                params![model_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        return Err(match actual {
            Some(actual) => DatabaseError::VersionConflict {
                entity: "model".into(),
                id: model_id.to_string(),
                expected: expected_version,
                actual,
            },
            None => DatabaseError::NotFound {
                entity: "model".into(),
                id: model_id.to_string(),
            },
        });
    }

    debug!(model_id = %model_id, version = expected_version + 1, "bumped model version");
    Ok(expected_version + 1)
}

fn workspace_key(model_id: Uuid, user_id: Uuid) -> String {
    format!("{}/{}", model_id, user_id)
}

fn workspace_not_found(model_id: Uuid, user_id: Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity: "workspace".into(),
        id: workspace_key(model_id, user_id),
    }
}

/// JSON has no NaN or infinity, so non-finite numbers are refused here
/// rather than stored as `null`.
fn encode_cameras(cameras: &CameraCollection) -> Result<String, DatabaseError> {
    for (camera_id, camera) in cameras {
        if let Some(path) = non_finite_field(camera) {
            return Err(DatabaseError::NonFiniteValue {
                camera_id: camera_id.clone(),
                path: path.to_string(),
            });
        }
    }
    Ok(serde_json::to_string(cameras)?)
}

fn decode_cameras(text: &str) -> Result<CameraCollection, DatabaseError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
