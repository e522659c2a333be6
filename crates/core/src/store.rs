//! Persistence seams used by the merge engine.
//!
//! The engine only talks to storage through these traits. [`Database`]
//! implements all of them on SQLite; tests wrap it to inject failures.
//!
//! [`Database`]: crate::db::Database

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::DatabaseError;
use crate::models::{CameraCollection, Fields, MergeAction, Model, Workspace};

/// Read and conditionally update published models.
pub trait ModelStore {
    /// Load a model. Camera collections not selected by `fields` come back
    /// empty.
    fn get_model(&self, model_id: Uuid, fields: Fields) -> Result<Option<Model>, DatabaseError>;

    /// Replace the model's cameras if its version is still
    /// `expected_version`, returning the bumped version.
    fn replace_model_cameras(
        &self,
        model_id: Uuid,
        cameras: &CameraCollection,
        expected_version: i64,
    ) -> Result<i64, DatabaseError>;
}

/// Per-user workspace storage.
pub trait WorkspaceStore {
    fn get_workspace(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        fields: Fields,
    ) -> Result<Option<Workspace>, DatabaseError>;

    /// Fork the current model state into a new workspace.
    fn create_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<Workspace, DatabaseError>;

    /// Returns false when there was nothing to delete.
    fn delete_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError>;

    /// Overwrite the workspace, leaving it pristine at `base_version`.
    fn replace_workspace_cameras(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        cameras: &CameraCollection,
        base_cameras: &CameraCollection,
        base_version: i64,
    ) -> Result<(), DatabaseError>;
}

/// A merge result to persist in one transaction.
///
/// Both variants publish `cameras` to the model, guarded by the model
/// version and the workspace generation and version the merge was computed
/// from.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeCommit {
    /// Bump the model and rebase the workspace onto the new version.
    Publish {
        model_id: Uuid,
        user_id: Uuid,
        expected_model_version: i64,
        expected_generation: Uuid,
        expected_workspace_version: i64,
        cameras: CameraCollection,
    },
    /// Bump the model and delete the workspace.
    Finalize {
        model_id: Uuid,
        user_id: Uuid,
        expected_model_version: i64,
        expected_generation: Uuid,
        expected_workspace_version: i64,
        cameras: CameraCollection,
    },
}

impl MergeCommit {
    pub fn model_id(&self) -> Uuid {
        match self {
            Self::Publish { model_id, .. } | Self::Finalize { model_id, .. } => *model_id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            Self::Publish { user_id, .. } | Self::Finalize { user_id, .. } => *user_id,
        }
    }
}

/// An entry for the merge log.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeLogRecord {
    pub model_id: Uuid,
    pub user_id: Uuid,
    pub action: MergeAction,
    pub model_version: Option<i64>,
    pub conflicts: usize,
    pub details: Option<String>,
}

impl MergeLogRecord {
    pub fn new(model_id: Uuid, user_id: Uuid, action: MergeAction) -> Self {
        Self {
            model_id,
            user_id,
            action,
            model_version: None,
            conflicts: 0,
            details: None,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.model_version = Some(version);
        self
    }

    pub fn with_conflicts(mut self, conflicts: usize) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Everything the merge engine needs from storage.
pub trait MergeStore: ModelStore + WorkspaceStore {
    /// Apply `commit` atomically and return the new model version.
    ///
    /// Fails with [`DatabaseError::VersionConflict`] when either guarded
    /// version moved since it was read, and with
    /// [`DatabaseError::WorkspaceReplaced`] when the workspace was forked
    /// again in between.
    fn commit(&self, commit: &MergeCommit) -> Result<i64, DatabaseError>;

    fn record_merge(&self, record: &MergeLogRecord) -> Result<(), DatabaseError>;
}

// ---------------------------------------------------------------------------
// Shared handles
// ---------------------------------------------------------------------------

impl<T: ModelStore + ?Sized> ModelStore for Arc<T> {
    fn get_model(&self, model_id: Uuid, fields: Fields) -> Result<Option<Model>, DatabaseError> {
        (**self).get_model(model_id, fields)
    }

    fn replace_model_cameras(
        &self,
        model_id: Uuid,
        cameras: &CameraCollection,
        expected_version: i64,
    ) -> Result<i64, DatabaseError> {
        (**self).replace_model_cameras(model_id, cameras, expected_version)
    }
}

impl<T: WorkspaceStore + ?Sized> WorkspaceStore for Arc<T> {
    fn get_workspace(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        fields: Fields,
    ) -> Result<Option<Workspace>, DatabaseError> {
        (**self).get_workspace(model_id, user_id, fields)
    }

    fn create_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<Workspace, DatabaseError> {
        (**self).create_workspace(model_id, user_id)
    }

    fn delete_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
        (**self).delete_workspace(model_id, user_id)
    }

    fn replace_workspace_cameras(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        cameras: &CameraCollection,
        base_cameras: &CameraCollection,
        base_version: i64,
    ) -> Result<(), DatabaseError> {
        (**self).replace_workspace_cameras(model_id, user_id, cameras, base_cameras, base_version)
    }
}

impl<T: MergeStore + ?Sized> MergeStore for Arc<T> {
    fn commit(&self, commit: &MergeCommit) -> Result<i64, DatabaseError> {
        (**self).commit(commit)
    }

    fn record_merge(&self, record: &MergeLogRecord) -> Result<(), DatabaseError> {
        (**self).record_merge(record)
    }
}
