//! Error types for the camsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Caller-facing classification of a [`MergeError`].
///
/// Transport layers map these onto their own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    InvariantViolation,
    TransactionConflict,
    Internal,
}

/// Errors from the merge orchestrator, the conflict tree and resolution
/// handling.
#[derive(Debug, Error)]
pub enum MergeError {
    /// No workspace or model exists for the given keys.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A workspace already exists for this model/user pair.
    #[error("workspace already exists for model {model_id} and user {user_id}")]
    AlreadyExists { model_id: String, user_id: String },

    /// The submitted resolution set does not match the conflict set.
    #[error("invalid resolution for camera '{camera_id}' at '{path}': {detail}")]
    InvalidResolution {
        camera_id: String,
        path: String,
        detail: String,
    },

    /// A resolution was submitted for a workspace without local edits.
    #[error("workspace for model {model_id} has no local changes to resolve")]
    NothingToResolve { model_id: String },

    /// The workspace claims a base version the model never reached.
    #[error(
        "workspace base version {base_version} is ahead of model {model_id} version {model_version}"
    )]
    InvariantViolation {
        model_id: String,
        user_id: String,
        base_version: i64,
        model_version: i64,
    },

    /// A concurrent writer bumped the model or workspace first.
    #[error("concurrent update on {entity} {id}: expected version {expected}, found {actual}")]
    TransactionConflict {
        entity: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    /// The workspace was deleted and forked again after it was read.
    #[error("workspace {id} was replaced while merging")]
    WorkspaceReplaced { id: String },

    /// Malformed conflict path data.
    #[error("conflict tree error at '{path}': {detail}")]
    ConflictTree { path: String, detail: String },

    /// Database error while reading or committing merge state.
    #[error("merge database error: {0}")]
    DatabaseError(DatabaseError),
}

impl MergeError {
    /// Classify this error for the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidResolution { .. } | Self::NothingToResolve { .. } => {
                ErrorKind::InvalidInput
            }
            Self::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            Self::TransactionConflict { .. } | Self::WorkspaceReplaced { .. } => {
                ErrorKind::TransactionConflict
            }
            Self::ConflictTree { .. } | Self::DatabaseError(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid_resolution(
        camera_id: &str,
        path: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvalidResolution {
            camera_id: camera_id.to_string(),
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<DatabaseError> for MergeError {
    /// Store-level outcomes that the caller can act on keep their meaning;
    /// everything else becomes an internal database failure.
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            DatabaseError::AlreadyExists { model_id, user_id } => {
                Self::AlreadyExists { model_id, user_id }
            }
            DatabaseError::VersionConflict {
                entity,
                id,
                expected,
                actual,
            } => Self::TransactionConflict {
                entity,
                id,
                expected,
                actual,
            },
            DatabaseError::WorkspaceReplaced { id } => Self::WorkspaceReplaced { id },
            other => Self::DatabaseError(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A stored camera collection could not be encoded or decoded.
    #[error("camera collection (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A workspace already exists for the pair.
    #[error("workspace already exists for model {model_id} and user {user_id}")]
    AlreadyExists { model_id: String, user_id: String },

    /// A conditional write found a different version than expected.
    #[error("{entity} {id} version mismatch: expected {expected}, found {actual}")]
    VersionConflict {
        entity: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    /// The workspace row now belongs to a different fork.
    #[error("workspace {id} was replaced by a new fork")]
    WorkspaceReplaced { id: String },

    /// Camera numbers must be finite to be stored.
    #[error("camera '{camera_id}' field '{path}' is not a finite number")]
    NonFiniteValue { camera_id: String, path: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MergeError::NotFound {
            entity: "workspace".into(),
            id: "m1/u1".into(),
        };
        assert_eq!(err.to_string(), "workspace not found: m1/u1");

        let err = MergeError::InvariantViolation {
            model_id: "m1".into(),
            user_id: "u1".into(),
            base_version: 7,
            model_version: 3,
        };
        assert!(err.to_string().contains("ahead of model m1 version 3"));

        let err = ConfigError::InvalidValue {
            field: "merge.commit_retries".into(),
            detail: "too large".into(),
        };
        assert!(err.to_string().contains("merge.commit_retries"));
    }

    #[test]
    fn test_merge_error_kinds() {
        assert_eq!(
            MergeError::invalid_resolution("123", "angleX", "missing").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            MergeError::NothingToResolve {
                model_id: "m".into()
            }
            .kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            MergeError::ConflictTree {
                path: "a".into(),
                detail: "deep".into()
            }
            .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_database_error_maps_onto_merge_kinds() {
        let err: MergeError = DatabaseError::VersionConflict {
            entity: "model".into(),
            id: "m1".into(),
            expected: 2,
            actual: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TransactionConflict);

        let err: MergeError = DatabaseError::AlreadyExists {
            model_id: "m1".into(),
            user_id: "u1".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err: MergeError = DatabaseError::WorkspaceReplaced { id: "m1/u1".into() }.into();
        assert_eq!(err.kind(), ErrorKind::TransactionConflict);

        let err: MergeError = DatabaseError::NotFound {
            entity: "model".into(),
            id: "m1".into(),
        }
        .into();
        assert!(matches!(err, MergeError::NotFound { .. }));

        let err: MergeError = DatabaseError::MigrationFailed {
            version: 1,
            detail: "boom".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = ConfigError::FileNotFound("x.toml".into()).into();
        assert!(matches!(core_err, CoreError::Config(_)));

        let core_err: CoreError = MergeError::NothingToResolve {
            model_id: "m".into(),
        }
        .into();
        assert!(matches!(core_err, CoreError::Merge(_)));
    }
}
