//! Structural differ for camera records.
//!
//! Walks the field accessor table and reports every leaf whose value differs
//! between two records. Absent records are diffed as
//! [`CameraRecord::default()`] by the caller, so there is no error path.

use tracing::trace;

use crate::fields::{FieldValue, CAMERA_FIELDS};
use crate::models::CameraRecord;

/// One changed leaf field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Dotted field path, e.g. `frustumColor.r`.
    pub path: &'static str,
    pub from: FieldValue,
    pub to: FieldValue,
}

/// Return the fields that differ between `from` and `to`, in table order.
pub fn diff(from: &CameraRecord, to: &CameraRecord) -> Vec<FieldChange> {
    let changes: Vec<FieldChange> = CAMERA_FIELDS
        .iter()
        .filter_map(|field| {
            let before = field.get(from);
            let after = field.get(to);
            (before != after).then_some(FieldChange {
                path: field.path,
                from: before,
                to: after,
            })
        })
        .collect();

    trace!(count = changes.len(), "diffed camera records");
    changes
}
