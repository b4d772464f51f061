//! Snapshot codec: scene ⇄ persistable JSON snapshot.
//!
//! DESIGN
//! ======
//! Encoding asks the scene for its serializable form with the extra fields
//! the engine would otherwise omit, then strips the missing-value sentinel
//! (`null`) from the whole tree. The store treats `null` as absence and
//! rejects it inside documents, so an encoded [`Snapshot`] never carries one.
//!
//! Decoding hands the snapshot to the scene and repairs freehand paths on the
//! way in: the engine restores a path's fill as black, which would draw every
//! stroke as a filled blob. Each restored path gets `fill = "transparent"`
//! and `paintFirst = "stroke"`, then the scene is redrawn exactly once.
//!
//! ERROR HANDLING
//! ==============
//! A snapshot that is not an object with an `objects` array, or whose
//! descriptors cannot be parsed, is [`CodecError::Malformed`]. The scene is left
//! as it was; callers treat that as a failed load.

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::consts::{DEFAULT_BACKGROUND, PAINT_FIRST_STROKE, SNAPSHOT_VERSION, TRANSPARENT};
use crate::doc::DrawableObject;
use crate::scene::{Scene, SceneError};

/// Extra descriptor fields written on every encode.
pub const DEFAULT_EXTRA_FIELDS: &[&str] = &["selectable", "stroke"];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The scene refused the snapshot's shape or one of its objects.
    #[error(transparent)]
    Malformed(SceneError),
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Persistable form of a scene: `{version, background, objects}`.
///
/// Always free of `null` at any depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct Snapshot(Value);

impl From<Value> for Snapshot {
    fn from(value: Value) -> Self {
        Self(strip_missing(value))
    }
}

impl From<Snapshot> for Value {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.0
    }
}

impl Snapshot {
    /// A blank scene's snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self(json!({
            "version": SNAPSHOT_VERSION,
            "background": DEFAULT_BACKGROUND,
            "objects": [],
        }))
    }

    /// Interpret a value read from the store.
    ///
    /// Returns `None` for "no snapshot": `null`, a string that does not hold
    /// a JSON object (older records stored the placeholder `"{}"` as text), or
    /// an object without an `objects` array. A string holding a full snapshot
    /// is parsed.
    #[must_use]
    pub fn from_stored(value: Value) -> Option<Self> {
        let value = match value {
            Value::String(text) => serde_json::from_str::<Value>(&text).unwrap_or(Value::Null),
            other => other,
        };
        if value.get("objects").is_some_and(Value::is_array) { Some(Self::from(value)) } else { None }
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Object descriptors, empty if the snapshot has none.
    #[must_use]
    pub fn objects(&self) -> &[Value] {
        self.0.get("objects").and_then(Value::as_array).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn background(&self) -> Option<&str> {
        self.0.get("background").and_then(Value::as_str)
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Encode the scene's objects plus `extra_fields` into a snapshot.
///
/// # Errors
///
/// Returns [`CodecError::Serialize`] if an object cannot be serialized.
pub fn encode(scene: &Scene, extra_fields: &[&str]) -> Result<Snapshot, CodecError> {
    let value = scene.to_serializable(extra_fields)?;
    Ok(Snapshot::from(value))
}

/// Replace the scene's contents with `snapshot`.
///
/// `None` leaves the scene untouched. Restored freehand paths are normalized
/// and the scene is redrawn once after the last object is restored.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for a malformed snapshot; the scene is left
/// unchanged.
pub fn decode(snapshot: Option<&Snapshot>, scene: &mut Scene) -> Result<(), CodecError> {
    let Some(snapshot) = snapshot else {
        return Ok(());
    };
    scene.load_from_serializable(snapshot.as_value(), |scene| {
        let ids: Vec<_> = scene.objects().iter().filter(|o| o.is_freehand()).map(|o| o.id).collect();
        for id in ids {
            if let Some(object) = scene.object_mut(id) {
                normalize_freehand(object);
            }
        }
        scene.render_all();
    })
    .map_err(CodecError::Malformed)
}

/// Force a freehand path to draw as an outline: transparent fill, stroke
/// painted first. Returns whether the object is a freehand path.
pub fn normalize_freehand(object: &mut DrawableObject) -> bool {
    if !object.is_freehand() {
        return false;
    }
    object.fill = Some(TRANSPARENT.to_owned());
    object.paint_first = Some(PAINT_FIRST_STROKE.to_owned());
    true
}

/// Remove every `null` from `value`: object entries whose value is `null`
/// and `null` array elements, at any depth. A top-level `null` is returned
/// as is.
#[must_use]
pub fn strip_missing(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_missing(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().filter(|v| !v.is_null()).map(strip_missing).collect()),
        other => other,
    }
}
