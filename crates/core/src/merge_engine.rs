//! Workspace merge orchestration.
//!
//! The [`MergeEngine`] drives a workspace back into its model:
//!
//! 1. Load the workspace; a pristine workspace needs no merge.
//! 2. Load the model and compare its version with the workspace base.
//! 3. Fast-forward when the model has not moved, otherwise run a three-way
//!    merge of the camera collections.
//! 4. Commit clean results atomically; hand conflicts back to the caller,
//!    who answers them through [`MergeEngine::resolve`].
//!
//! Every commit is guarded by the model version and the workspace generation
//! and version read in the same attempt, so a concurrent writer turns into a
//! transaction conflict ([`ErrorKind::TransactionConflict`]) instead of a
//! lost update.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MergeConfig;
use crate::conflict::{
    apply_resolutions, conflict_count, merge_all_cameras, validate_resolutions, ConflictMap,
    ConflictReport, ResolutionSet,
};
use crate::errors::{ErrorKind, MergeError};
use crate::models::{CameraCollection, Fields, MergeAction, Workspace};
use crate::store::{MergeCommit, MergeLogRecord, MergeStore};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The workspace had no local edits; nothing was written.
    NoChanges,
    /// The model had not moved; the workspace cameras were published as-is.
    FastForward { version: i64 },
    /// Both sides moved and merged cleanly.
    Merged { version: i64 },
    /// Both sides moved and some fields conflict; nothing was written.
    Conflicted(ConflictReport),
}

impl MergeOutcome {
    /// The new model version, for outcomes that committed one.
    pub fn version(&self) -> Option<i64> {
        match self {
            Self::FastForward { version } | Self::Merged { version } => Some(*version),
            Self::NoChanges | Self::Conflicted(_) => None,
        }
    }

    /// Wire representation of this outcome.
    pub fn response(&self) -> MergeResponse {
        match self {
            Self::NoChanges => MergeResponse::Status { no_changes: true },
            Self::FastForward { .. } | Self::Merged { .. } => {
                MergeResponse::Status { no_changes: false }
            }
            Self::Conflicted(report) => MergeResponse::Conflicts(report.clone()),
        }
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChanges => write!(f, "no changes"),
            Self::FastForward { version } => write!(f, "fast-forward to version {}", version),
            Self::Merged { version } => write!(f, "merged as version {}", version),
            Self::Conflicted(report) => write!(f, "{} conflicting field(s)", report.conflict_count()),
        }
    }
}

/// JSON body returned to merge callers: `{"noChanges": bool}` or
/// `{"merged": ..., "conflicts": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MergeResponse {
    Status {
        #[serde(rename = "noChanges")]
        no_changes: bool,
    },
    Conflicts(ConflictReport),
}

/// Result of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub version: i64,
}

/// What a merge attempt would do, computed from one read of both sides.
#[derive(Debug)]
enum MergePlan {
    NoChanges,
    FastForward {
        workspace: Workspace,
        model_version: i64,
    },
    ThreeWay {
        workspace: Workspace,
        model_version: i64,
        report: ConflictReport,
    },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Merges workspaces into models over any [`MergeStore`].
pub struct MergeEngine<S> {
    store: S,
    commit_retries: u32,
}

impl<S: MergeStore> MergeEngine<S> {
    pub fn new(store: S, config: &MergeConfig) -> Self {
        info!(commit_retries = config.commit_retries, "initializing merge engine");
        Self {
            store,
            commit_retries: config.commit_retries,
        }
    }

    /// Return a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fork the model into a new workspace for `user_id`.
    pub fn create_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<Workspace, MergeError> {
        let workspace = self.store.create_workspace(model_id, user_id)?;
        self.record(
            MergeLogRecord::new(model_id, user_id, MergeAction::WorkspaceCreated)
                .with_version(workspace.base_version),
        );
        Ok(workspace)
    }

    /// Discard a workspace. Returns false when none existed.
    pub fn delete_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<bool, MergeError> {
        let deleted = self.store.delete_workspace(model_id, user_id)?;
        if deleted {
            info!(model_id = %model_id, user_id = %user_id, "workspace deleted");
            self.record(MergeLogRecord::new(
                model_id,
                user_id,
                MergeAction::WorkspaceDeleted,
            ));
        }
        Ok(deleted)
    }

    /// Merge the workspace into its model, retrying the whole attempt when a
    /// concurrent writer wins the commit race.
    pub fn merge(&self, model_id: Uuid, user_id: Uuid) -> Result<MergeOutcome, MergeError> {
        let mut attempt = 0;
        loop {
            match self.try_merge(model_id, user_id) {
                Err(err)
                    if err.kind() == ErrorKind::TransactionConflict
                        && attempt < self.commit_retries =>
                {
                    attempt += 1;
                    warn!(
                        model_id = %model_id,
                        user_id = %user_id,
                        attempt,
                        error = %err,
                        "merge commit lost a race, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    /// Make exactly one merge attempt.
    pub fn try_merge(&self, model_id: Uuid, user_id: Uuid) -> Result<MergeOutcome, MergeError> {
        match self.plan(model_id, user_id)? {
            MergePlan::NoChanges => {
                debug!(model_id = %model_id, user_id = %user_id, "workspace has no local changes");
                Ok(MergeOutcome::NoChanges)
            }
            MergePlan::FastForward {
                workspace,
                model_version,
            } => {
                let version = self.commit(MergeCommit::Publish {
                    model_id,
                    user_id,
                    expected_model_version: model_version,
                    expected_generation: workspace.generation,
                    expected_workspace_version: workspace.version,
                    cameras: workspace.cameras,
                })?;
                info!(model_id = %model_id, user_id = %user_id, version, "fast-forwarded model");
                self.record(
                    MergeLogRecord::new(model_id, user_id, MergeAction::FastForward)
                        .with_version(version),
                );
                Ok(MergeOutcome::FastForward { version })
            }
            MergePlan::ThreeWay {
                workspace,
                model_version,
                report,
            } => {
                if !report.is_clean() {
                    info!(
                        model_id = %model_id,
                        user_id = %user_id,
                        conflicts = report.conflict_count(),
                        "merge has conflicts"
                    );
                    return Ok(MergeOutcome::Conflicted(report));
                }

                let cameras = report.merged.len();
                let version = self.commit(MergeCommit::Publish {
                    model_id,
                    user_id,
                    expected_model_version: model_version,
                    expected_generation: workspace.generation,
                    expected_workspace_version: workspace.version,
                    cameras: report.merged,
                })?;
                info!(model_id = %model_id, user_id = %user_id, version, cameras, "merged workspace");
                self.record(
                    MergeLogRecord::new(model_id, user_id, MergeAction::Merged)
                        .with_version(version)
                        .with_details(format!("{} camera(s)", cameras)),
                );
                Ok(MergeOutcome::Merged { version })
            }
        }
    }

    /// Compute what a merge would produce without committing anything.
    ///
    /// Pristine and fast-forwardable workspaces report no conflicts.
    pub fn preview(&self, model_id: Uuid, user_id: Uuid) -> Result<ConflictReport, MergeError> {
        let report = match self.plan(model_id, user_id)? {
            MergePlan::NoChanges => {
                let ws = self.load_workspace(model_id, user_id, Fields::CAMERAS)?;
                ConflictReport {
                    merged: ws.cameras,
                    conflicts: ConflictMap::new(),
                }
            }
            MergePlan::FastForward { workspace, .. } => ConflictReport {
                merged: workspace.cameras,
                conflicts: ConflictMap::new(),
            },
            MergePlan::ThreeWay { report, .. } => report,
        };
        debug!(
            model_id = %model_id,
            user_id = %user_id,
            conflicts = report.conflict_count(),
            "computed merge preview"
        );
        Ok(report)
    }

    /// Apply the caller's answers to the current conflicts, publish the
    /// result and delete the workspace.
    ///
    /// Conflicts are recomputed from current state, so answers to a stale
    /// report are rejected rather than applied to the wrong fields.
    pub fn resolve(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        resolutions: &ResolutionSet,
    ) -> Result<ResolveOutcome, MergeError> {
        let (workspace, model_version, merged, conflicts): (
            Workspace,
            i64,
            CameraCollection,
            ConflictMap,
        ) = match self.plan(model_id, user_id)? {
            MergePlan::NoChanges => {
                return Err(MergeError::NothingToResolve {
                    model_id: model_id.to_string(),
                });
            }
            MergePlan::FastForward {
                workspace,
                model_version,
            } => {
                let merged = workspace.cameras.clone();
                (workspace, model_version, merged, ConflictMap::new())
            }
            MergePlan::ThreeWay {
                workspace,
                model_version,
                report,
            } => (workspace, model_version, report.merged, report.conflicts),
        };

        validate_resolutions(&conflicts, resolutions)?;
        let resolved = apply_resolutions(merged, resolutions)?;

        let version = self.commit(MergeCommit::Finalize {
            model_id,
            user_id,
            expected_model_version: model_version,
            expected_generation: workspace.generation,
            expected_workspace_version: workspace.version,
            cameras: resolved,
        })?;

        let resolved_fields = conflict_count(&conflicts);
        info!(
            model_id = %model_id,
            user_id = %user_id,
            version,
            resolved_fields,
            "resolved conflicts and closed workspace"
        );
        self.record(
            MergeLogRecord::new(model_id, user_id, MergeAction::Resolved)
                .with_version(version)
                .with_conflicts(resolved_fields),
        );
        Ok(ResolveOutcome { version })
    }

    // -- internals ----------------------------------------------------------

    fn plan(&self, model_id: Uuid, user_id: Uuid) -> Result<MergePlan, MergeError> {
        let workspace = self.load_workspace(model_id, user_id, Fields::ALL)?;
        if workspace.is_pristine() {
            return Ok(MergePlan::NoChanges);
        }

        let model = self
            .store
            .get_model(model_id, Fields::CAMERAS)?
            .ok_or_else(|| MergeError::NotFound {
                entity: "model".into(),
                id: model_id.to_string(),
            })?;

        if model.version == workspace.base_version {
            debug!(model_id = %model_id, version = model.version, "model unchanged since fork");
            return Ok(MergePlan::FastForward {
                workspace,
                model_version: model.version,
            });
        }

        if model.version < workspace.base_version {
            error!(
                model_id = %model_id,
                user_id = %user_id,
                base_version = workspace.base_version,
                model_version = model.version,
                "workspace base version is ahead of its model"
            );
            return Err(MergeError::InvariantViolation {
                model_id: model_id.to_string(),
                user_id: user_id.to_string(),
                base_version: workspace.base_version,
                model_version: model.version,
            });
        }

        debug!(
            model_id = %model_id,
            base_version = workspace.base_version,
            model_version = model.version,
            "running three-way merge"
        );
        let (merged, conflicts) =
            merge_all_cameras(&workspace.base_cameras, &model.cameras, &workspace.cameras)?;

        Ok(MergePlan::ThreeWay {
            workspace,
            model_version: model.version,
            report: ConflictReport { merged, conflicts },
        })
    }

    fn load_workspace(
        &self,
        model_id: Uuid,
        user_id: Uuid,
        fields: Fields,
    ) -> Result<Workspace, MergeError> {
        self.store
            .get_workspace(model_id, user_id, fields)?
            .ok_or_else(|| MergeError::NotFound {
                entity: "workspace".into(),
                id: format!("{}/{}", model_id, user_id),
            })
    }

    fn commit(&self, commit: MergeCommit) -> Result<i64, MergeError> {
        self.store.commit(&commit).map_err(|e| {
            let err = MergeError::from(e);
            if err.kind() == ErrorKind::TransactionConflict {
                warn!(
                    model_id = %commit.model_id(),
                    user_id = %commit.user_id(),
                    error = %err,
                    "commit rejected by version check"
                );
            }
            err
        })
    }

    /// Write a merge log entry. Failures are logged and otherwise ignored.
    fn record(&self, record: MergeLogRecord) {
        if let Err(e) = self.store.record_merge(&record) {
            warn!(action = %record.action, error = %e, "failed to write merge log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use serde_json::json;

    use crate::db::Database;
    use crate::errors::{DatabaseError, ErrorKind};
    use crate::models::{CameraRecord, Model};
    use crate::store::{ModelStore, WorkspaceStore};

    /// Delegates to a [`Database`], bumping the model behind the engine's
    /// back before the first `races` commits and counting commits. Before
    /// the first `reforks` commits it instead deletes the workspace, forks
    /// it again and saves one edit.
    struct RacingStore {
        db: Database,
        races: Cell<u32>,
        reforks: Cell<u32>,
        commits: Cell<u32>,
    }

    impl RacingStore {
        fn new(db: Database, races: u32) -> Self {
            Self {
                db,
                races: Cell::new(races),
                reforks: Cell::new(0),
                commits: Cell::new(0),
            }
        }
    }

    impl ModelStore for RacingStore {
        fn get_model(&self, model_id: Uuid, fields: Fields) -> Result<Option<Model>, DatabaseError> {
            self.db.get_model(model_id, fields)
        }

        fn replace_model_cameras(
            &self,
            model_id: Uuid,
            cameras: &CameraCollection,
            expected_version: i64,
        ) -> Result<i64, DatabaseError> {
            self.db.replace_model_cameras(model_id, cameras, expected_version)
        }
    }

    impl WorkspaceStore for RacingStore {
        fn get_workspace(
            &self,
            model_id: Uuid,
            user_id: Uuid,
            fields: Fields,
        ) -> Result<Option<Workspace>, DatabaseError> {
            self.db.get_workspace(model_id, user_id, fields)
        }

        fn create_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<Workspace, DatabaseError> {
            self.db.create_workspace(model_id, user_id)
        }

        fn delete_workspace(&self, model_id: Uuid, user_id: Uuid) -> Result<bool, DatabaseError> {
            self.db.delete_workspace(model_id, user_id)
        }

        fn replace_workspace_cameras(
            &self,
            model_id: Uuid,
            user_id: Uuid,
            cameras: &CameraCollection,
            base_cameras: &CameraCollection,
            base_version: i64,
        ) -> Result<(), DatabaseError> {
            self.db
                .replace_workspace_cameras(model_id, user_id, cameras, base_cameras, base_version)
        }
    }

    impl MergeStore for RacingStore {
        fn commit(&self, commit: &MergeCommit) -> Result<i64, DatabaseError> {
            self.commits.set(self.commits.get() + 1);
            if self.races.get() > 0 {
                self.races.set(self.races.get() - 1);
                let model = self
                    .db
                    .get_model_entry(commit.model_id(), Fields::CAMERAS)?;
                let mut cameras = model.cameras;
                let id = format!("other-{}", model.version);
                cameras.insert(id.clone(), CameraRecord::named(id));
                self.db
                    .replace_model_cameras(commit.model_id(), &cameras, model.version)?;
            } else if self.reforks.get() > 0 {
                self.reforks.set(self.reforks.get() - 1);
                let (model_id, user_id) = (commit.model_id(), commit.user_id());
                self.db.delete_workspace(model_id, user_id)?;
                self.db.create_workspace(model_id, user_id)?;
                self.db
                    .upsert_workspace_camera(model_id, user_id, "fresh", &CameraRecord::named("fresh"))?;
            }
            self.db.commit_merge(commit)
        }

        fn record_merge(&self, record: &MergeLogRecord) -> Result<(), DatabaseError> {
            self.db.insert_merge_log(record).map(|_| ())
        }
    }

    fn camera(name: &str, angle_x: f64) -> CameraRecord {
        let mut cam = CameraRecord::named(name);
        cam.angle_x = angle_x;
        cam
    }

    fn engine_with(races: u32, retries: u32) -> (MergeEngine<RacingStore>, Uuid, Uuid) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let cameras: CameraCollection = [("123".to_string(), camera("front", 1.0))]
            .into_iter()
            .collect();
        let model = db.insert_model("car", &cameras).unwrap();
        let engine = MergeEngine::new(
            RacingStore::new(db, races),
            &MergeConfig {
                commit_retries: retries,
            },
        );
        let user = Uuid::new_v4();
        engine.create_workspace(model.id, user).unwrap();
        (engine, model.id, user)
    }

    fn db(engine: &MergeEngine<RacingStore>) -> &Database {
        &engine.store().db
    }

    #[test]
    fn test_pristine_workspace_has_no_changes_and_no_writes() {
        let (engine, model_id, user) = engine_with(0, 3);
        let before = db(&engine).get_workspace_entry(model_id, user, Fields::ALL).unwrap();

        let outcome = engine.merge(model_id, user).unwrap();
        assert_eq!(outcome, MergeOutcome::NoChanges);
        assert_eq!(
            serde_json::to_value(outcome.response()).unwrap(),
            json!({"noChanges": true})
        );

        assert_eq!(engine.store().commits.get(), 0);
        let after = db(&engine).get_workspace_entry(model_id, user, Fields::ALL).unwrap();
        assert_eq!(before, after);
        assert_eq!(db(&engine).get_model_entry(model_id, Fields::VERSIONS).unwrap().version, 1);
    }

    #[test]
    fn test_fast_forward_publishes_workspace_verbatim() {
        let (engine, model_id, user) = engine_with(0, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "123", &camera("front", 9.0))
            .unwrap();
        db(&engine).remove_workspace_camera(model_id, user, "123").unwrap();
        db(&engine)
            .upsert_workspace_camera(model_id, user, "789", &camera("rear", 3.0))
            .unwrap();
        let ws = db(&engine).get_workspace_entry(model_id, user, Fields::CAMERAS).unwrap();

        let outcome = engine.merge(model_id, user).unwrap();
        assert_eq!(outcome, MergeOutcome::FastForward { version: 2 });
        assert_eq!(
            serde_json::to_value(outcome.response()).unwrap(),
            json!({"noChanges": false})
        );

        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert_eq!(model.cameras, ws.cameras);

        let rebased = db(&engine).get_workspace_entry(model_id, user, Fields::ALL).unwrap();
        assert!(rebased.is_pristine());
        assert_eq!(rebased.base_version, 2);
        assert_eq!(rebased.base_cameras, ws.cameras);
    }

    #[test]
    fn test_conflicting_merge_persists_nothing() {
        let (engine, model_id, user) = engine_with(0, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "123", &camera("front", 10.0))
            .unwrap();
        db(&engine)
            .upsert_workspace_camera(model_id, user, "456", &camera("side", 0.0))
            .unwrap();
        let main: CameraCollection = [("123".to_string(), camera("front", 12.0))]
            .into_iter()
            .collect();
        db(&engine).replace_model_cameras(model_id, &main, 1).unwrap();
        let before = db(&engine).get_workspace_entry(model_id, user, Fields::ALL).unwrap();

        let outcome = engine.merge(model_id, user).unwrap();
        let MergeOutcome::Conflicted(report) = &outcome else {
            panic!("expected conflicts, got {outcome:?}");
        };
        assert_eq!(report.conflict_count(), 1);
        assert_eq!(report.merged["123"].angle_x, 1.0);
        assert!(report.merged.contains_key("456"));

        let body = serde_json::to_value(outcome.response()).unwrap();
        assert_eq!(
            body["conflicts"],
            json!({"123": {"angleX": {"base": 1.0, "main": 12.0, "workspace": 10.0}}})
        );

        assert_eq!(engine.store().commits.get(), 0);
        assert_eq!(db(&engine).get_model_entry(model_id, Fields::VERSIONS).unwrap().version, 2);
        assert_eq!(
            db(&engine).get_workspace_entry(model_id, user, Fields::ALL).unwrap(),
            before
        );
    }

    #[test]
    fn test_clean_merge_commits_and_rebases() {
        let (engine, model_id, user) = engine_with(0, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "456", &camera("side", 2.0))
            .unwrap();
        let main: CameraCollection = [("123".to_string(), camera("front", 12.0))]
            .into_iter()
            .collect();
        db(&engine).replace_model_cameras(model_id, &main, 1).unwrap();

        assert_eq!(engine.merge(model_id, user).unwrap(), MergeOutcome::Merged { version: 3 });

        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert_eq!(model.cameras["123"].angle_x, 12.0);
        assert_eq!(model.cameras["456"].angle_x, 2.0);

        let ws = db(&engine).get_workspace_entry(model_id, user, Fields::ALL).unwrap();
        assert_eq!((ws.version, ws.base_version), (3, 3));
        assert_eq!(ws.cameras, model.cameras);
        assert_eq!(ws.base_cameras, model.cameras);

        let log = db(&engine).list_merge_log(Some(model_id), 10).unwrap();
        assert_eq!(log[0].action(), Some(MergeAction::Merged));
        assert_eq!(log[0].model_version, Some(3));
    }

    #[test]
    fn test_base_ahead_of_model_is_invariant_violation() {
        let (engine, model_id, user) = engine_with(0, 3);
        let empty = CameraCollection::new();
        db(&engine)
            .replace_workspace_cameras(model_id, user, &empty, &empty, 5)
            .unwrap();
        db(&engine)
            .upsert_workspace_camera(model_id, user, "x", &camera("x", 1.0))
            .unwrap();

        let err = engine.merge(model_id, user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert_eq!(engine.store().commits.get(), 0);
    }

    #[test]
    fn test_missing_workspace_and_model() {
        let (engine, model_id, _) = engine_with(0, 3);
        let err = engine.merge(model_id, Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine.create_workspace(Uuid::new_v4(), Uuid::nil()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_workspace_rejected() {
        let (engine, model_id, user) = engine_with(0, 3);
        let err = engine.create_workspace(model_id, user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_merge_retries_after_lost_race() {
        let (engine, model_id, user) = engine_with(1, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "mine", &camera("mine", 4.0))
            .unwrap();

        let outcome = engine.merge(model_id, user).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { version: 3 });
        assert_eq!(engine.store().commits.get(), 2);

        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert!(model.cameras.contains_key("mine"));
        assert!(model.cameras.contains_key("other-1"));
    }

    #[test]
    fn test_try_merge_does_not_retry() {
        let (engine, model_id, user) = engine_with(1, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "mine", &camera("mine", 4.0))
            .unwrap();

        let err = engine.try_merge(model_id, user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionConflict);
        assert_eq!(engine.store().commits.get(), 1);

        let ws = db(&engine).get_workspace_entry(model_id, user, Fields::CAMERAS).unwrap();
        assert!(!ws.is_pristine());
        assert!(ws.cameras.contains_key("mine"));
    }

    #[test]
    fn test_recreated_workspace_fails_commit_and_keeps_new_edit() {
        let (engine, model_id, user) = engine_with(0, 3);
        engine.store().reforks.set(1);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "stale", &camera("stale", 1.0))
            .unwrap();

        // The replacement workspace is at the same version as the one read.
        let err = engine.try_merge(model_id, user).unwrap_err();
        assert!(matches!(err, MergeError::WorkspaceReplaced { .. }));
        assert_eq!(err.kind(), ErrorKind::TransactionConflict);

        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert_eq!(model.version, 1);
        assert!(!model.cameras.contains_key("stale"));
        let ws = db(&engine).get_workspace_entry(model_id, user, Fields::CAMERAS).unwrap();
        assert!(ws.cameras.contains_key("fresh"));
        assert!(!ws.cameras.contains_key("stale"));

        // A retry reads the new fork and publishes its edit.
        assert_eq!(
            engine.merge(model_id, user).unwrap(),
            MergeOutcome::FastForward { version: 2 }
        );
        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert!(model.cameras.contains_key("fresh"));
        assert!(!model.cameras.contains_key("stale"));
    }

    #[test]
    fn test_merge_gives_up_after_configured_retries() {
        let (engine, model_id, user) = engine_with(u32::MAX, 2);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "mine", &camera("mine", 4.0))
            .unwrap();

        let err = engine.merge(model_id, user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionConflict);
        assert_eq!(engine.store().commits.get(), 3);
    }

    #[test]
    fn test_preview_does_not_commit() {
        let (engine, model_id, user) = engine_with(0, 3);
        let report = engine.preview(model_id, user).unwrap();
        assert!(report.is_clean());
        assert!(report.merged.contains_key("123"));

        db(&engine)
            .upsert_workspace_camera(model_id, user, "123", &camera("front", 10.0))
            .unwrap();
        let main: CameraCollection = [("123".to_string(), camera("front", 12.0))]
            .into_iter()
            .collect();
        db(&engine).replace_model_cameras(model_id, &main, 1).unwrap();

        let report = engine.preview(model_id, user).unwrap();
        assert_eq!(report.conflict_count(), 1);
        assert_eq!(engine.store().commits.get(), 0);
    }

    #[test]
    fn test_resolve_pristine_workspace_rejected() {
        let (engine, model_id, user) = engine_with(0, 3);
        let err = engine
            .resolve(model_id, user, &ResolutionSet::new())
            .unwrap_err();
        assert!(matches!(err, MergeError::NothingToResolve { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_resolve_commits_and_deletes_workspace() {
        let (engine, model_id, user) = engine_with(0, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "123", &camera("front", 10.0))
            .unwrap();
        let main: CameraCollection = [("123".to_string(), camera("front", 12.0))]
            .into_iter()
            .collect();
        db(&engine).replace_model_cameras(model_id, &main, 1).unwrap();

        let incomplete = ResolutionSet::new();
        let err = engine.resolve(model_id, user, &incomplete).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(db(&engine).get_workspace(model_id, user, Fields::VERSIONS).unwrap().is_some());

        let answers: ResolutionSet =
            serde_json::from_value(json!({"123": {"angleX": 11.0}})).unwrap();
        let outcome = engine.resolve(model_id, user, &answers).unwrap();
        assert_eq!(outcome, ResolveOutcome { version: 3 });

        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert_eq!(model.cameras["123"].angle_x, 11.0);
        assert!(db(&engine).get_workspace(model_id, user, Fields::VERSIONS).unwrap().is_none());

        let log = db(&engine).list_merge_log(Some(model_id), 1).unwrap();
        assert_eq!(log[0].action(), Some(MergeAction::Resolved));
        assert_eq!(log[0].conflicts, 1);
    }

    #[test]
    fn test_resolve_fast_forwardable_workspace_with_empty_set() {
        let (engine, model_id, user) = engine_with(0, 3);
        db(&engine)
            .upsert_workspace_camera(model_id, user, "new", &camera("new", 1.0))
            .unwrap();

        let outcome = engine.resolve(model_id, user, &ResolutionSet::new()).unwrap();
        assert_eq!(outcome.version, 2);
        let model = db(&engine).get_model_entry(model_id, Fields::CAMERAS).unwrap();
        assert!(model.cameras.contains_key("new"));
    }

    #[test]
    fn test_delete_workspace_logs_once() {
        let (engine, model_id, user) = engine_with(0, 3);
        assert!(engine.delete_workspace(model_id, user).unwrap());
        assert!(!engine.delete_workspace(model_id, user).unwrap());

        let actions: Vec<_> = db(&engine)
            .list_merge_log(Some(model_id), 10)
            .unwrap()
            .iter()
            .filter_map(|e| e.action())
            .collect();
        assert_eq!(
            actions,
            vec![MergeAction::WorkspaceDeleted, MergeAction::WorkspaceCreated]
        );
    }

    #[test]
    fn test_response_deserializes_both_shapes() {
        let status: MergeResponse = serde_json::from_value(json!({"noChanges": false})).unwrap();
        assert_eq!(status, MergeResponse::Status { no_changes: false });

        let conflicts: MergeResponse =
            serde_json::from_value(json!({"merged": {}, "conflicts": {}})).unwrap();
        assert_eq!(conflicts, MergeResponse::Conflicts(ConflictReport::default()));
    }
}
