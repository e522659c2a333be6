//! Three-way merge of camera records and camera collections.
//!
//! Both entry points are pure: they take the ancestor (`base`), the published
//! state (`main`) and the user's edits (`workspace`) and return the merged
//! result together with whatever could not be merged automatically.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::differ::diff;
use crate::conflict::tree::{build_conflict_tree, conflict_count, ConflictMap, ConflictNode};
use crate::errors::MergeError;
use crate::fields::{FieldValue, CAMERA_FIELDS};
use crate::models::{CameraCollection, CameraRecord};

/// Outcome of a collection merge that could not complete automatically.
///
/// `merged` holds every non-conflicting change already applied; conflicting
/// fields keep their base value until a resolution overwrites them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub merged: CameraCollection,
    pub conflicts: ConflictMap,
}

impl ConflictReport {
    /// True when no field conflicts.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicting leaf fields across all cameras.
    pub fn conflict_count(&self) -> usize {
        conflict_count(&self.conflicts)
    }
}

/// Merge one camera field by field.
///
/// Starts from a copy of `base`. A field changed on one side takes that
/// side's value; a field changed identically on both sides takes it once; a
/// field changed differently on both sides keeps the base value and is
/// recorded in the returned conflict subtree.
pub fn merge_camera(
    base: &CameraRecord,
    main: &CameraRecord,
    workspace: &CameraRecord,
) -> Result<(CameraRecord, BTreeMap<String, ConflictNode>), MergeError> {
    let mut main_changes: HashMap<&'static str, FieldValue> = diff(base, main)
        .into_iter()
        .map(|change| (change.path, change.to))
        .collect();
    let mut work_changes: HashMap<&'static str, FieldValue> = diff(base, workspace)
        .into_iter()
        .map(|change| (change.path, change.to))
        .collect();

    let mut merged = base.clone();
    let mut conflicts = BTreeMap::new();

    for field in CAMERA_FIELDS {
        match (
            main_changes.remove(field.path),
            work_changes.remove(field.path),
        ) {
            (None, None) => {}
            (Some(value), None) => {
                debug!(field = field.path, "taking main change");
                field.set(&mut merged, value);
            }
            (None, Some(value)) => {
                debug!(field = field.path, "taking workspace change");
                field.set(&mut merged, value);
            }
            (Some(from_main), Some(from_work)) if from_main == from_work => {
                debug!(field = field.path, "identical change on both sides");
                field.set(&mut merged, from_main);
            }
            (Some(from_main), Some(from_work)) => {
                debug!(
                    field = field.path,
                    main = %from_main,
                    workspace = %from_work,
                    "conflicting change"
                );
                build_conflict_tree(
                    &mut conflicts,
                    field.path,
                    field.get(base),
                    from_main,
                    from_work,
                )?;
            }
        }
    }

    Ok((merged, conflicts))
}

/// Merge whole camera collections.
///
/// Cameras added on only one side are taken as they are, a camera missing
/// from both `main` and `workspace` is dropped, and everything else goes
/// through [`merge_camera`] with zero records standing in for missing sides.
pub fn merge_all_cameras(
    base: &CameraCollection,
    main: &CameraCollection,
    workspace: &CameraCollection,
) -> Result<(CameraCollection, ConflictMap), MergeError> {
    let ids: BTreeSet<&String> = base
        .keys()
        .chain(main.keys())
        .chain(workspace.keys())
        .collect();

    let zero = CameraRecord::default();
    let mut merged = CameraCollection::new();
    let mut conflicts = ConflictMap::new();

    for id in ids {
        match (base.get(id), main.get(id), workspace.get(id)) {
            (None, None, Some(added)) => {
                debug!(camera_id = %id, "camera added in workspace");
                merged.insert(id.clone(), added.clone());
            }
            (None, Some(added), None) => {
                debug!(camera_id = %id, "camera added in main");
                merged.insert(id.clone(), added.clone());
            }
            (_, None, None) => {
                debug!(camera_id = %id, "camera deleted, dropping");
            }
            (b, m, w) => {
                let (record, camera_conflicts) = merge_camera(
                    b.unwrap_or(&zero),
                    m.unwrap_or(&zero),
                    w.unwrap_or(&zero),
                )?;
                merged.insert(id.clone(), record);
                if !camera_conflicts.is_empty() {
                    conflicts.insert(id.clone(), ConflictNode::Branch(camera_conflicts));
                }
            }
        }
    }

    info!(
        cameras = merged.len(),
        conflicted_cameras = conflicts.len(),
        "merged camera collections"
    );

    Ok((merged, conflicts))
}
