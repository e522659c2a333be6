//! Field-level three-way merging of camera collections.
//!
//! The conflict subsystem is responsible for:
//! 1. **Diffing** -- finding the fields that changed between two records.
//! 2. **Merging** -- combining main and workspace edits against their
//!    common ancestor, collecting what cannot be combined into a conflict tree.
//! 3. **Resolution** -- checking a client's answers against the conflict tree
//!    and applying them.

pub mod differ;
pub mod merger;
pub mod resolver;
pub mod tree;

pub use differ::{diff, FieldChange};
pub use merger::{merge_all_cameras, merge_camera, ConflictReport};
pub use resolver::{apply_resolutions, validate_resolutions, ResolutionNode, ResolutionSet};
pub use tree::{
    build_conflict_tree, conflict_count, ConflictMap, ConflictNode, FieldConflict,
    MAX_CONFLICT_DEPTH,
};
