//! Compile-time field accessor table for [`CameraRecord`].
//!
//! Every leaf field of a camera has a stable dotted path (the wire name,
//! e.g. `angleX` or `frustumColor.r`), a value kind, and a typed
//! getter/setter pair. The differ, the merger and the resolution applier all
//! go through this table instead of inspecting records dynamically.

use serde::{Deserialize, Serialize};

use crate::models::CameraRecord;

/// Separator between segments of a field path.
pub const PATH_SEPARATOR: char = '.';

/// The type of a leaf field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Flag,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Flag => write!(f, "boolean"),
        }
    }
}

/// A scalar field value. Serializes as the bare JSON scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Text(_) => FieldKind::Text,
            Self::Number(_) => FieldKind::Number,
            Self::Flag(_) => FieldKind::Flag,
        }
    }

    /// Convert a JSON scalar into a value of `kind`.
    ///
    /// Returns `Ok(None)` for non-scalar JSON (null, arrays, objects) and
    /// `Err(actual kind)` when the scalar has the wrong type.
    pub fn from_json(
        kind: FieldKind,
        value: &serde_json::Value,
    ) -> Result<Option<FieldValue>, &'static str> {
        use serde_json::Value;
        match (kind, value) {
            (FieldKind::Text, Value::String(s)) => Ok(Some(FieldValue::Text(s.clone()))),
            (FieldKind::Number, Value::Number(n)) => match n.as_f64() {
                Some(f) => Ok(Some(FieldValue::Number(f))),
                None => Err("number out of range"),
            },
            (FieldKind::Flag, Value::Bool(b)) => Ok(Some(FieldValue::Flag(*b))),
            (_, Value::Null | Value::Array(_) | Value::Object(_)) => Ok(None),
            (_, Value::String(_)) => Err("string"),
            (_, Value::Number(_)) => Err("number"),
            (_, Value::Bool(_)) => Err("boolean"),
        }
    }
}

/// Equality used by the differ: plain scalar equality, except that two NaNs
/// compare equal.
impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Flag(a), Self::Flag(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// Typed access to one leaf field of a camera.
pub struct FieldAccessor {
    pub path: &'static str,
    pub kind: FieldKind,
    get: fn(&CameraRecord) -> FieldValue,
    set: fn(&mut CameraRecord, FieldValue) -> bool,
}

impl FieldAccessor {
    pub fn get(&self, camera: &CameraRecord) -> FieldValue {
        (self.get)(camera)
    }

    /// Write `value` into `camera`. Returns false (and leaves the camera
    /// untouched) when the value has the wrong kind.
    pub fn set(&self, camera: &mut CameraRecord, value: FieldValue) -> bool {
        (self.set)(camera, value)
    }

    pub fn segments(&self) -> impl Iterator<Item = &'static str> {
        self.path.split(PATH_SEPARATOR)
    }
}

impl std::fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

macro_rules! field {
    ($path:literal, Text, $($f:ident).+) => {
        FieldAccessor {
            path: $path,
            kind: FieldKind::Text,
            get: |c| FieldValue::Text((c.$($f).+).clone()),
            set: |c, v| match v {
                FieldValue::Text(s) => {
                    c.$($f).+ = s;
                    true
                }
                _ => false,
            },
        }
    };
    ($path:literal, Number, $($f:ident).+) => {
        FieldAccessor {
            path: $path,
            kind: FieldKind::Number,
            get: |c| FieldValue::Number(c.$($f).+),
            set: |c, v| match v {
                FieldValue::Number(n) => {
                    c.$($f).+ = n;
                    true
                }
                _ => false,
            },
        }
    };
    ($path:literal, Flag, $($f:ident).+) => {
        FieldAccessor {
            path: $path,
            kind: FieldKind::Flag,
            get: |c| FieldValue::Flag(c.$($f).+),
            set: |c, v| match v {
                FieldValue::Flag(b) => {
                    c.$($f).+ = b;
                    true
                }
                _ => false,
            },
        }
    };
}

/// Every leaf field of a camera record, in wire order.
pub static CAMERA_FIELDS: &[FieldAccessor] = &[
    field!("name", Text, name),
    field!("angleX", Number, angle_x),
    field!("angleY", Number, angle_y),
    field!("angleZ", Number, angle_z),
    field!("angleW", Number, angle_w),
    field!("posX", Number, pos_x),
    field!("posY", Number, pos_y),
    field!("posZ", Number, pos_z),
    field!("fov", Number, fov),
    field!("frustumColor.r", Number, frustum_color.r),
    field!("frustumColor.g", Number, frustum_color.g),
    field!("frustumColor.b", Number, frustum_color.b),
    field!("frustumColor.a", Number, frustum_color.a),
    field!("frustumLength", Number, frustum_length),
    field!("isHidingArrows", Flag, is_hiding_arrows),
    field!("isHidingWheels", Flag, is_hiding_wheels),
    field!("isLockingPosition", Flag, is_locking_position),
    field!("isLockingRotation", Flag, is_locking_rotation),
    field!("isHidingFrustum", Flag, is_hiding_frustum),
    field!("aspectWidth", Number, aspect_width),
    field!("aspectHeight", Number, aspect_height),
];

/// Look up the accessor for a dotted path.
pub fn accessor(path: &str) -> Option<&'static FieldAccessor> {
    CAMERA_FIELDS.iter().find(|f| f.path == path)
}

/// The path of the first number field that is NaN or infinite.
pub fn non_finite_field(camera: &CameraRecord) -> Option<&'static str> {
    CAMERA_FIELDS
        .iter()
        .find(|f| matches!(f.get(camera), FieldValue::Number(n) if !n.is_finite()))
        .map(|f| f.path)
}

/// Join path segments with [`PATH_SEPARATOR`].
pub fn join_path(segments: &[&str]) -> String {
    segments.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths_are_unique() {
        let mut paths: Vec<_> = CAMERA_FIELDS.iter().map(|f| f.path).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), CAMERA_FIELDS.len());
    }

    #[test]
    fn test_table_matches_wire_format() {
        // Every accessor path must resolve inside the serialized record, and
        // every serialized leaf must have an accessor.
        let value = serde_json::to_value(CameraRecord::default()).unwrap();
        let mut leaves = 0;
        for (key, v) in value.as_object().unwrap() {
            match v.as_object() {
                Some(nested) => {
                    for sub in nested.keys() {
                        leaves += 1;
                        assert!(accessor(&format!("{}.{}", key, sub)).is_some(), "{key}.{sub}");
                    }
                }
                None => {
                    leaves += 1;
                    assert!(accessor(key).is_some(), "{key}");
                }
            }
        }
        assert_eq!(leaves, CAMERA_FIELDS.len());
    }

    #[test]
    fn test_get_and_set_nested() {
        let mut cam = CameraRecord::default();
        let acc = accessor("frustumColor.b").unwrap();
        assert_eq!(acc.kind, FieldKind::Number);
        assert!(acc.set(&mut cam, FieldValue::Number(0.75)));
        assert_eq!(cam.frustum_color.b, 0.75);
        assert_eq!(acc.get(&cam), FieldValue::Number(0.75));
        assert_eq!(acc.segments().collect::<Vec<_>>(), vec!["frustumColor", "b"]);
    }

    #[test]
    fn test_non_finite_field() {
        let mut cam = CameraRecord::named("lens");
        assert_eq!(non_finite_field(&cam), None);
        cam.frustum_color.a = f64::INFINITY;
        assert_eq!(non_finite_field(&cam), Some("frustumColor.a"));
        cam.fov = f64::NAN;
        assert_eq!(non_finite_field(&cam), Some("fov"));
    }

    #[test]
    fn test_set_rejects_wrong_kind() {
        let mut cam = CameraRecord::named("keep");
        let acc = accessor("name").unwrap();
        assert!(!acc.set(&mut cam, FieldValue::Number(3.0)));
        assert_eq!(cam.name, "keep");
    }

    #[test]
    fn test_nan_equals_nan() {
        assert_eq!(FieldValue::Number(f64::NAN), FieldValue::Number(f64::NAN));
        assert_ne!(FieldValue::Number(1.0), FieldValue::Flag(true));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            FieldValue::from_json(FieldKind::Number, &json!(12)),
            Ok(Some(FieldValue::Number(12.0)))
        );
        assert_eq!(
            FieldValue::from_json(FieldKind::Flag, &json!(true)),
            Ok(Some(FieldValue::Flag(true)))
        );
        assert_eq!(FieldValue::from_json(FieldKind::Text, &json!(null)), Ok(None));
        assert_eq!(FieldValue::from_json(FieldKind::Number, &json!([1, 2])), Ok(None));
        assert_eq!(
            FieldValue::from_json(FieldKind::Number, &json!("12")),
            Err("string")
        );
    }

    #[test]
    fn test_value_serializes_as_bare_scalar() {
        assert_eq!(serde_json::to_value(FieldValue::Number(1.0)).unwrap(), json!(1.0));
        assert_eq!(serde_json::to_value(FieldValue::Flag(false)).unwrap(), json!(false));
        assert_eq!(
            serde_json::to_value(FieldValue::Text("cam".into())).unwrap(),
            json!("cam")
        );
    }
}
