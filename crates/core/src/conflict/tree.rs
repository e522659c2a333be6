//! Nested conflict data keyed by field path.
//!
//! Each camera with conflicts gets a [`ConflictNode::Branch`] root; dotted
//! field paths become nested branches ending in a [`FieldConflict`] leaf, so
//! `frustumColor.r` serializes as `{"frustumColor": {"r": {...}}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::MergeError;
use crate::fields::{FieldValue, PATH_SEPARATOR};
use crate::models::CameraId;

/// Upper bound on path segments in a conflict tree. Camera records nest at
/// most one level, so valid data never gets close.
pub const MAX_CONFLICT_DEPTH: usize = 8;

/// True when a path of `segments` segments is deeper than any conflict tree
/// may be.
pub(crate) fn exceeds_max_depth(segments: usize) -> bool {
    segments > MAX_CONFLICT_DEPTH
}

/// The three disputed values of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub base: FieldValue,
    pub main: FieldValue,
    pub workspace: FieldValue,
}

/// A conflict tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictNode {
    Leaf(FieldConflict),
    Branch(BTreeMap<String, ConflictNode>),
}

/// Per-camera conflict trees.
pub type ConflictMap = BTreeMap<CameraId, ConflictNode>;

impl ConflictNode {
    /// An empty branch.
    pub fn branch() -> Self {
        Self::Branch(BTreeMap::new())
    }

    /// All leaves below this node with their dotted paths, in key order.
    pub fn leaves(&self) -> Vec<(String, &FieldConflict)> {
        let mut out = Vec::new();
        collect_leaves(self, String::new(), &mut out);
        out
    }

    /// Number of leaf conflicts below this node.
    pub fn count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Branch(children) => children.values().map(ConflictNode::count).sum(),
        }
    }
}

fn collect_leaves<'a>(
    node: &'a ConflictNode,
    prefix: String,
    out: &mut Vec<(String, &'a FieldConflict)>,
) {
    match node {
        ConflictNode::Leaf(conflict) => out.push((prefix, conflict)),
        ConflictNode::Branch(children) => {
            for (key, child) in children {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, PATH_SEPARATOR, key)
                };
                collect_leaves(child, path, out);
            }
        }
    }
}

/// Total number of leaf conflicts across all cameras.
pub fn conflict_count(conflicts: &ConflictMap) -> usize {
    conflicts.values().map(ConflictNode::count).sum()
}

/// Record a conflict at the dotted `path` inside `tree`, creating
/// intermediate branches as needed.
///
/// Fails on an empty path or segment, on a path longer than
/// [`MAX_CONFLICT_DEPTH`], and when the path would pass through (or replace)
/// a node of the other shape.
pub fn build_conflict_tree(
    tree: &mut BTreeMap<String, ConflictNode>,
    path: &str,
    base: FieldValue,
    main: FieldValue,
    workspace: FieldValue,
) -> Result<(), MergeError> {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    let conflict = FieldConflict {
        base,
        main,
        workspace,
    };
    insert_at(tree, path, &segments, 0, conflict)
}

fn insert_at(
    tree: &mut BTreeMap<String, ConflictNode>,
    full_path: &str,
    segments: &[&str],
    depth: usize,
    conflict: FieldConflict,
) -> Result<(), MergeError> {
    if exceeds_max_depth(depth + 1) {
        return Err(tree_error(
            full_path,
            format!("path exceeds maximum depth of {}", MAX_CONFLICT_DEPTH),
        ));
    }

    let Some((head, rest)) = segments.split_first() else {
        return Err(tree_error(full_path, "empty path"));
    };
    if head.is_empty() {
        return Err(tree_error(full_path, "empty path segment"));
    }

    if rest.is_empty() {
        if let Some(ConflictNode::Branch(_)) = tree.get(*head) {
            return Err(tree_error(full_path, "leaf would replace a branch"));
        }
        tree.insert(head.to_string(), ConflictNode::Leaf(conflict));
        return Ok(());
    }

    match tree
        .entry(head.to_string())
        .or_insert_with(ConflictNode::branch)
    {
        ConflictNode::Branch(children) => insert_at(children, full_path, rest, depth + 1, conflict),
        ConflictNode::Leaf(_) => Err(tree_error(full_path, "path runs through a leaf")),
    }
}

fn tree_error(path: &str, detail: impl Into<String>) -> MergeError {
    MergeError::ConflictTree {
        path: path.to_string(),
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn num(n: f64) -> FieldValue {
        FieldValue::Number(n)
    }

    #[test]
    fn test_flat_leaf() {
        let mut tree = BTreeMap::new();
        build_conflict_tree(&mut tree, "angleX", num(1.0), num(12.0), num(10.0)).unwrap();

        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"angleX": {"base": 1.0, "main": 12.0, "workspace": 10.0}})
        );
    }

    #[test]
    fn test_nested_path_creates_branches() {
        let mut tree = BTreeMap::new();
        build_conflict_tree(&mut tree, "frustumColor.r", num(0.0), num(0.5), num(0.7)).unwrap();
        build_conflict_tree(&mut tree, "frustumColor.g", num(0.1), num(0.2), num(0.3)).unwrap();

        let node = ConflictNode::Branch(tree);
        assert_eq!(node.count(), 2);
        let paths: Vec<_> = node.leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["frustumColor.g", "frustumColor.r"]);
    }

    #[test]
    fn test_depth_limit_is_an_error() {
        let deep = vec!["s"; MAX_CONFLICT_DEPTH + 1].join(".");
        let mut tree = BTreeMap::new();
        let err = build_conflict_tree(&mut tree, &deep, num(0.0), num(1.0), num(2.0)).unwrap_err();
        assert!(matches!(err, MergeError::ConflictTree { .. }));

        let ok = vec!["s"; MAX_CONFLICT_DEPTH].join(".");
        build_conflict_tree(&mut tree, &ok, num(0.0), num(1.0), num(2.0)).unwrap();
    }

    #[test]
    fn test_empty_segments_rejected() {
        let mut tree = BTreeMap::new();
        assert!(build_conflict_tree(&mut tree, "", num(0.0), num(1.0), num(2.0)).is_err());
        assert!(build_conflict_tree(&mut tree, "a..b", num(0.0), num(1.0), num(2.0)).is_err());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_shape_collisions_rejected() {
        let mut tree = BTreeMap::new();
        build_conflict_tree(&mut tree, "frustumColor", num(0.0), num(1.0), num(2.0)).unwrap();
        assert!(
            build_conflict_tree(&mut tree, "frustumColor.r", num(0.0), num(1.0), num(2.0))
                .is_err()
        );

        let mut tree = BTreeMap::new();
        build_conflict_tree(&mut tree, "frustumColor.r", num(0.0), num(1.0), num(2.0)).unwrap();
        assert!(
            build_conflict_tree(&mut tree, "frustumColor", num(0.0), num(1.0), num(2.0)).is_err()
        );
    }

    #[test]
    fn test_deserializes_leaf_and_branch() {
        let node: ConflictNode = serde_json::from_value(json!({
            "name": {"base": "a", "main": "b", "workspace": "c"},
            "frustumColor": {"r": {"base": 0.0, "main": 1.0, "workspace": 0.5}}
        }))
        .unwrap();
        assert_eq!(node.count(), 2);
        let leaves = node.leaves();
        assert_eq!(leaves[1].0, "name");
        assert_eq!(leaves[1].1.main, FieldValue::Text("b".into()));
    }
}
