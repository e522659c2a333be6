//! Table rendering for cameras, conflict reports and the merge log.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde_json::Value;

use camsync_core::conflict::{ConflictNode, ConflictReport, ResolutionNode, ResolutionSet};
use camsync_core::db::queries::MergeLogEntry;
use camsync_core::fields::FieldValue;
use camsync_core::models::{CameraCollection, MergeAction};

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

/// One row per camera with its placement.
pub fn camera_table(cameras: &CameraCollection) -> Table {
    let mut table = new_table(&["ID", "Name", "Position", "Rotation", "FOV"]);
    for (id, cam) in cameras {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(&cam.name),
            Cell::new(format!("{}, {}, {}", cam.pos_x, cam.pos_y, cam.pos_z)),
            Cell::new(format!(
                "{}, {}, {}, {}",
                cam.angle_x, cam.angle_y, cam.angle_z, cam.angle_w
            )),
            Cell::new(cam.fov),
        ]);
    }
    table
}

/// One row per conflicting field.
pub fn conflict_table(report: &ConflictReport) -> Table {
    let mut table = new_table(&["Camera", "Field", "Base", "Main", "Workspace"]);
    for (camera_id, node) in &report.conflicts {
        for (path, conflict) in node.leaves() {
            table.add_row(vec![
                Cell::new(camera_id),
                Cell::new(path),
                Cell::new(conflict.base.to_string()),
                Cell::new(conflict.main.to_string()).fg(Color::Cyan),
                Cell::new(conflict.workspace.to_string()).fg(Color::Yellow),
            ]);
        }
    }
    table
}

/// Recent merge log entries, newest first.
pub fn history_table(entries: &[MergeLogEntry]) -> Table {
    let mut table = new_table(&["Time", "Model", "User", "Action", "Version", "Details"]);
    for entry in entries {
        let action = match entry.action() {
            Some(MergeAction::FastForward) | Some(MergeAction::Merged) => {
                Cell::new(&entry.action).fg(Color::Green)
            }
            Some(MergeAction::Resolved) => Cell::new(&entry.action).fg(Color::Cyan),
            Some(MergeAction::WorkspaceDeleted) => Cell::new(&entry.action).fg(Color::Yellow),
            _ => Cell::new(&entry.action),
        };
        let details = match (entry.conflicts, entry.details.as_deref()) {
            (0, details) => details.unwrap_or("").to_string(),
            (n, Some(details)) => format!("{} ({} conflict(s))", details, n),
            (n, None) => format!("{} conflict(s)", n),
        };
        table.add_row(vec![
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(short_id(&entry.model_id)),
            Cell::new(short_id(&entry.user_id)),
            action,
            Cell::new(
                entry
                    .model_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(truncate(&details, 48)),
        ]);
    }
    table
}

/// A resolution set answering every conflict with the workspace value,
/// ready to be edited and passed back to `resolve`.
pub fn resolution_template(report: &ConflictReport) -> ResolutionSet {
    report
        .conflicts
        .iter()
        .map(|(id, node)| (id.clone(), template_node(node)))
        .collect()
}

fn template_node(node: &ConflictNode) -> ResolutionNode {
    match node {
        ConflictNode::Leaf(conflict) => ResolutionNode::Leaf(json_value(&conflict.workspace)),
        ConflictNode::Branch(children) => ResolutionNode::Branch(
            children
                .iter()
                .map(|(segment, child)| (segment.clone(), template_node(child)))
                .collect(),
        ),
    }
}

fn json_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Flag(b) => Value::Bool(*b),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
