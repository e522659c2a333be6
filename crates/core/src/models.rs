//! Domain model types used throughout camsync.
//!
//! These types bridge the merge engine, the database layer, and whatever
//! transport sits in front of them. Their serde representation is the wire
//! format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque camera key.
pub type CameraId = String;

/// Camera records keyed by id. Ordered so that output is deterministic.
pub type CameraCollection = BTreeMap<CameraId, CameraRecord>;

// ---------------------------------------------------------------------------
// Camera record
// ---------------------------------------------------------------------------

/// RGBA frustum color, each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorRgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

/// A single camera placed on a 3D model.
///
/// Fields missing from the JSON input take their zero value, which is also
/// what the merge uses for a camera absent on one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraRecord {
    pub name: String,
    pub angle_x: f64,
    pub angle_y: f64,
    pub angle_z: f64,
    pub angle_w: f64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub fov: f64,
    pub frustum_color: ColorRgba,
    pub frustum_length: f64,
    pub is_hiding_arrows: bool,
    pub is_hiding_wheels: bool,
    pub is_locking_position: bool,
    pub is_locking_rotation: bool,
    pub is_hiding_frustum: bool,
    pub aspect_width: f64,
    pub aspect_height: f64,
}

impl CameraRecord {
    /// A named camera with every other field at zero.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Model and workspace
// ---------------------------------------------------------------------------

/// The published, shared camera state of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: Uuid,
    pub name: String,
    pub version: i64,
    pub cameras: CameraCollection,
}

/// A user's private fork of a model's cameras.
///
/// `base_cameras` / `base_version` are the model snapshot taken at fork or at
/// the last clean merge and act as the three-way merge ancestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub model_id: Uuid,
    pub user_id: Uuid,
    /// Fresh for every fork, so a re-created workspace never passes for
    /// the one it replaced.
    pub generation: Uuid,
    pub version: i64,
    pub base_version: i64,
    pub cameras: CameraCollection,
    pub base_cameras: CameraCollection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// True when nothing was edited since fork or the last merge.
    pub fn is_pristine(&self) -> bool {
        self.version == self.base_version
    }
}

/// Which camera collections a read should load. Versions are always loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fields {
    pub cameras: bool,
    pub base_cameras: bool,
}

impl Fields {
    pub const ALL: Fields = Fields {
        cameras: true,
        base_cameras: true,
    };
    pub const CAMERAS: Fields = Fields {
        cameras: true,
        base_cameras: false,
    };
    pub const VERSIONS: Fields = Fields {
        cameras: false,
        base_cameras: false,
    };
}

// ---------------------------------------------------------------------------
// Merge log
// ---------------------------------------------------------------------------

/// Kinds of entries written to the merge log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    WorkspaceCreated,
    WorkspaceDeleted,
    FastForward,
    Merged,
    Resolved,
}

impl MergeAction {
    /// Parse an action string as stored in the database.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "workspace_created" => Some(Self::WorkspaceCreated),
            "workspace_deleted" => Some(Self::WorkspaceDeleted),
            "fast_forward" => Some(Self::FastForward),
            "merged" => Some(Self::Merged),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for MergeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkspaceCreated => write!(f, "workspace_created"),
            Self::WorkspaceDeleted => write!(f, "workspace_deleted"),
            Self::FastForward => write!(f, "fast_forward"),
            Self::Merged => write!(f, "merged"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}
