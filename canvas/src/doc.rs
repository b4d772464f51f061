//! Document model: drawable object descriptors, their kinds, and the pencil brush.
//!
//! A [`DrawableObject`] is both the in-memory object owned by a scene and its
//! persisted descriptor. Field names follow the engine's JSON layout
//! (`type`, `left`, `top`, `paintFirst`, ...) so snapshots written by other
//! clients load without translation. Fields this crate does not model are
//! kept in [`DrawableObject::extra`] and written back untouched.

#[cfg(test)]
#[path = "doc_test.rs"]
mod doc_test;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::consts::{DEFAULT_FILL, PAINT_FIRST_FILL, PENCIL_WIDTH};

/// Scene-local identifier for a drawable object. Never persisted.
pub type ObjectId = Uuid;

/// The kind of a drawable object, serialized as the descriptor's `type`.
///
/// Known kinds are matched case-insensitively (`"Rect"` and `"rect"` are the
/// same kind) and written back in lowercase. Anything else is carried as
/// [`ObjectKind::Other`] and written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectKind {
    /// Axis-aligned rectangle.
    Rect,
    /// Circle described by `radius`.
    Circle,
    /// Ellipse described by `rx` / `ry` or its bounding box.
    Ellipse,
    /// Freehand path produced by the pencil brush.
    Path,
    /// Editable text.
    IText,
    /// Static text.
    Text,
    /// A kind this crate does not model.
    Other(String),
}

impl ObjectKind {
    /// The serialized `type` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Rect => "rect",
            Self::Circle => "circle",
            Self::Ellipse => "ellipse",
            Self::Path => "path",
            Self::IText => "i-text",
            Self::Text => "text",
            Self::Other(kind) => kind,
        }
    }

    /// Whether objects of this kind are freehand strokes.
    #[must_use]
    pub fn is_freehand(&self) -> bool {
        matches!(self, Self::Path)
    }
}

impl From<String> for ObjectKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "rect" => Self::Rect,
            "circle" => Self::Circle,
            "ellipse" => Self::Ellipse,
            "path" => Self::Path,
            "i-text" | "itext" => Self::IText,
            "text" => Self::Text,
            _ => Self::Other(value),
        }
    }
}

impl From<ObjectKind> for String {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Other(kind) => kind,
            known => known.as_str().to_owned(),
        }
    }
}

/// A point in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A drawable object as held by the scene and as written to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawableObject {
    /// Scene-local identity, regenerated on every load.
    #[serde(skip, default = "Uuid::new_v4")]
    pub id: ObjectId,
    /// Shape type.
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    /// Left edge of the bounding box.
    #[serde(default)]
    pub left: f64,
    /// Top edge of the bounding box.
    #[serde(default)]
    pub top: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Circle radius.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Path commands, e.g. `["M", 10, 20]`, in absolute scene coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    /// Text content for text kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    /// Fill color. Written as `null` when unset.
    #[serde(default, deserialize_with = "lenient_string")]
    pub fill: Option<String>,
    /// Stroke color. Written as `null` when unset.
    #[serde(default, deserialize_with = "lenient_string")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    /// Paint order: `"fill"` or `"stroke"`. Written as `null` when unset.
    #[serde(default, deserialize_with = "lenient_string")]
    pub paint_first: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    /// Descriptor fields not modelled above, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept any JSON value for a style field; non-strings keep their JSON text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl DrawableObject {
    /// Create an object of `kind` at the origin with engine defaults.
    #[must_use]
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            left: 0.0,
            top: 0.0,
            width: None,
            height: None,
            radius: None,
            path: None,
            text: None,
            font_size: None,
            fill: Some(DEFAULT_FILL.to_owned()),
            stroke: None,
            stroke_width: Some(1.0),
            paint_first: Some(PAINT_FIRST_FILL.to_owned()),
            selectable: Some(true),
            editable: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn rect(left: f64, top: f64, width: f64, height: f64, fill: &str) -> Self {
        Self {
            left,
            top,
            width: Some(width),
            height: Some(height),
            fill: Some(fill.to_owned()),
            ..Self::new(ObjectKind::Rect)
        }
    }

    #[must_use]
    pub fn circle(left: f64, top: f64, radius: f64, fill: &str) -> Self {
        Self {
            left,
            top,
            radius: Some(radius),
            width: Some(radius * 2.0),
            height: Some(radius * 2.0),
            fill: Some(fill.to_owned()),
            ..Self::new(ObjectKind::Circle)
        }
    }

    /// Editable text at (`left`, `top`).
    #[must_use]
    pub fn text(content: &str, left: f64, top: f64, font_size: f64, fill: &str) -> Self {
        Self {
            left,
            top,
            text: Some(content.to_owned()),
            font_size: Some(font_size),
            fill: Some(fill.to_owned()),
            editable: Some(true),
            ..Self::new(ObjectKind::IText)
        }
    }

    #[must_use]
    pub fn is_freehand(&self) -> bool {
        self.kind.is_freehand()
    }

    /// Serialize the object the way the engine does.
    ///
    /// The engine omits `selectable` always and `stroke` for every kind but
    /// freehand paths unless the field is named in `extra_fields`.
    ///
    /// # Errors
    ///
    /// Returns an error if a flattened extra field cannot be serialized.
    pub fn to_serializable(&self, extra_fields: &[&str]) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            if !extra_fields.contains(&"selectable") {
                map.remove("selectable");
            }
            if !self.is_freehand() && !extra_fields.contains(&"stroke") {
                map.remove("stroke");
            }
        }
        Ok(value)
    }
}

/// Freehand brush installed while the pen tool is active.
#[derive(Debug, Clone, PartialEq)]
pub struct PencilBrush {
    pub color: String,
    pub width: f64,
}

impl PencilBrush {
    /// A pencil of the given color at the fixed pen width.
    #[must_use]
    pub fn new(color: impl Into<String>) -> Self {
        Self { color: color.into(), width: PENCIL_WIDTH }
    }

    /// Turn captured pointer positions into a path object.
    ///
    /// Consecutive points are joined with quadratic segments through their
    /// midpoints. Returns `None` for an empty stroke. The fill is left unset,
    /// as the engine does; callers are expected to normalize it.
    #[must_use]
    pub fn build_path(&self, points: &[Point]) -> Option<DrawableObject> {
        let (first, rest) = points.split_first()?;

        let mut commands = vec![json!(["M", first.x, first.y])];
        let mut prev = *first;
        for point in rest {
            let mid = Point::new((prev.x + point.x) / 2.0, (prev.y + point.y) / 2.0);
            commands.push(json!(["Q", prev.x, prev.y, mid.x, mid.y]));
            prev = *point;
        }
        commands.push(json!(["L", prev.x, prev.y]));

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for point in rest {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }

        let half = self.width / 2.0;
        let mut path = DrawableObject::new(ObjectKind::Path);
        path.left = min_x - half;
        path.top = min_y - half;
        path.width = Some(max_x - min_x);
        path.height = Some(max_y - min_y);
        path.path = Some(commands);
        path.fill = None;
        path.stroke = Some(self.color.clone());
        path.stroke_width = Some(self.width);
        path.extra.insert("strokeLineCap".into(), json!("round"));
        path.extra.insert("strokeLineJoin".into(), json!("round"));
        Some(path)
    }
}
