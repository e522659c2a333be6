//! Validation and application of client-submitted conflict resolutions.
//!
//! A [`ResolutionSet`] mirrors a [`ConflictMap`]: the same camera ids and the
//! same nested path segments, with the chosen value at each leaf.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::tree::{
    exceeds_max_depth, ConflictMap, ConflictNode, FieldConflict, MAX_CONFLICT_DEPTH,
};
use crate::errors::MergeError;
use crate::fields::{accessor, FieldValue, PATH_SEPARATOR};
use crate::models::{CameraCollection, CameraId};

/// One node of a submitted resolution. Any JSON object is a branch; every
/// other JSON value is a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolutionNode {
    Branch(BTreeMap<String, ResolutionNode>),
    Leaf(serde_json::Value),
}

/// Resolutions keyed by camera id.
pub type ResolutionSet = BTreeMap<CameraId, ResolutionNode>;

/// Check that `resolutions` covers `conflicts` exactly.
///
/// Every conflict leaf needs a leaf at the same path, every conflict branch a
/// branch. Entries that match no conflict and scalars of the wrong kind are
/// rejected too.
pub fn validate_resolutions(
    conflicts: &ConflictMap,
    resolutions: &ResolutionSet,
) -> Result<(), MergeError> {
    for (camera_id, conflict) in conflicts {
        let resolution = resolutions.get(camera_id).ok_or_else(|| {
            MergeError::invalid_resolution(camera_id, "", "missing resolution for camera")
        })?;
        validate_node(camera_id, "", conflict, resolution, 0)?;
    }

    if let Some(extra) = resolutions.keys().find(|id| !conflicts.contains_key(*id)) {
        return Err(MergeError::invalid_resolution(
            extra,
            "",
            "camera has no reported conflicts",
        ));
    }

    debug!(cameras = conflicts.len(), "resolutions cover all conflicts");
    Ok(())
}

/// `depth` is the number of path segments above `conflict`.
fn validate_node(
    camera_id: &str,
    path: &str,
    conflict: &ConflictNode,
    resolution: &ResolutionNode,
    depth: usize,
) -> Result<(), MergeError> {
    if exceeds_max_depth(depth) {
        return Err(MergeError::invalid_resolution(
            camera_id,
            path,
            format!("nesting exceeds maximum depth of {}", MAX_CONFLICT_DEPTH),
        ));
    }

    match (conflict, resolution) {
        (ConflictNode::Leaf(field), ResolutionNode::Leaf(value)) => {
            check_kind(camera_id, path, field, value)
        }
        (ConflictNode::Leaf(_), ResolutionNode::Branch(_)) => Err(MergeError::invalid_resolution(
            camera_id,
            path,
            "expected a value, found an object",
        )),
        (ConflictNode::Branch(_), ResolutionNode::Leaf(_)) => Err(MergeError::invalid_resolution(
            camera_id,
            path,
            "expected an object of fields",
        )),
        (ConflictNode::Branch(expected), ResolutionNode::Branch(given)) => {
            for (segment, child) in expected {
                let child_path = child_path(path, segment);
                let resolved = given.get(segment).ok_or_else(|| {
                    MergeError::invalid_resolution(camera_id, &child_path, "missing resolution")
                })?;
                validate_node(camera_id, &child_path, child, resolved, depth + 1)?;
            }
            if let Some(extra) = given.keys().find(|k| !expected.contains_key(*k)) {
                return Err(MergeError::invalid_resolution(
                    camera_id,
                    &child_path(path, extra),
                    "field has no reported conflict",
                ));
            }
            Ok(())
        }
    }
}

fn check_kind(
    camera_id: &str,
    path: &str,
    field: &FieldConflict,
    value: &serde_json::Value,
) -> Result<(), MergeError> {
    let kind = field.base.kind();
    FieldValue::from_json(kind, value)
        .map(|_| ())
        .map_err(|actual| {
            MergeError::invalid_resolution(
                camera_id,
                path,
                format!("expected {}, found {}", kind, actual),
            )
        })
}

/// Write every resolved leaf into `merged`.
///
/// Null and array leaves leave the merged value in place. Callers run
/// [`validate_resolutions`] first; this only fails on cameras or paths that
/// do not exist.
pub fn apply_resolutions(
    mut merged: CameraCollection,
    resolutions: &ResolutionSet,
) -> Result<CameraCollection, MergeError> {
    let mut applied = 0usize;

    for (camera_id, node) in resolutions {
        let camera = merged.get_mut(camera_id).ok_or_else(|| {
            MergeError::invalid_resolution(camera_id, "", "camera not present in merge result")
        })?;

        let mut leaves = Vec::new();
        collect_leaves(camera_id, node, String::new(), 0, &mut leaves)?;

        for (path, value) in leaves {
            let field = accessor(&path).ok_or_else(|| {
                MergeError::invalid_resolution(camera_id, &path, "unknown camera field")
            })?;
            match FieldValue::from_json(field.kind, value) {
                Ok(Some(resolved)) => {
                    field.set(camera, resolved);
                    applied += 1;
                }
                Ok(None) => {
                    debug!(camera_id = %camera_id, field = %path, "ignoring non-scalar resolution");
                }
                Err(actual) => {
                    return Err(MergeError::invalid_resolution(
                        camera_id,
                        &path,
                        format!("expected {}, found {}", field.kind, actual),
                    ));
                }
            }
        }
    }

    info!(fields = applied, "applied conflict resolutions");
    Ok(merged)
}

fn collect_leaves<'a>(
    camera_id: &str,
    node: &'a ResolutionNode,
    path: String,
    depth: usize,
    out: &mut Vec<(String, &'a serde_json::Value)>,
) -> Result<(), MergeError> {
    if exceeds_max_depth(depth) {
        return Err(MergeError::invalid_resolution(
            camera_id,
            &path,
            format!("nesting exceeds maximum depth of {}", MAX_CONFLICT_DEPTH),
        ));
    }
    match node {
        ResolutionNode::Leaf(value) => out.push((path, value)),
        ResolutionNode::Branch(children) => {
            for (segment, child) in children {
                collect_leaves(camera_id, child, child_path(&path, segment), depth + 1, out)?;
            }
        }
    }
    Ok(())
}

fn child_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}{}{}", parent, PATH_SEPARATOR, segment)
    }
}
