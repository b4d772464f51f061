//! Scene: the in-memory drawing surface owned by one editing session.
//!
//! DESIGN
//! ======
//! A `Scene` holds drawable objects in paint order, the active selection, the
//! background color, and the freehand brush. Every committed mutation fires a
//! [`SceneEvent`] to the listeners registered for its kind. Listeners receive
//! `&mut Scene`, so they may inspect or patch objects while handling an event.
//!
//! Events raised from inside a listener are queued and dispatched after the
//! current one finishes. Listeners registered during dispatch do not see the
//! event being dispatched. Loading a snapshot replaces objects silently: no
//! events fire, so a load never looks like a user edit.
//!
//! The scene does no drawing of its own. `render_all` only counts redraws so
//! callers and tests can observe them; pixels come from [`crate::raster`].

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;

use serde_json::{Value, json};

use crate::consts::{DEFAULT_BACKGROUND, SNAPSHOT_VERSION};
use crate::doc::{DrawableObject, ObjectId, PencilBrush, Point};
use crate::raster::{self, RasterError, RasterFormat};

// =============================================================================
// TYPES
// =============================================================================

/// Construction options for a [`Scene`].
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub background: String,
    /// Whether objects can become the active selection.
    pub selection: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { background: DEFAULT_BACKGROUND.to_owned(), selection: true, width: 0, height: 0 }
    }
}

/// Mutation event names, matching the engine's event strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneEventKind {
    ObjectAdded,
    ObjectModified,
    ObjectRemoved,
    PathCreated,
}

impl SceneEventKind {
    pub const ALL: [Self; 4] = [Self::ObjectAdded, Self::ObjectModified, Self::ObjectRemoved, Self::PathCreated];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectAdded => "object:added",
            Self::ObjectModified => "object:modified",
            Self::ObjectRemoved => "object:removed",
            Self::PathCreated => "path:created",
        }
    }
}

impl fmt::Display for SceneEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed scene mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    ObjectAdded(ObjectId),
    ObjectModified(ObjectId),
    /// The object is already gone from the scene when this fires.
    ObjectRemoved(ObjectId),
    /// A freehand stroke was committed as a new path object.
    PathCreated(ObjectId),
}

impl SceneEvent {
    #[must_use]
    pub fn kind(&self) -> SceneEventKind {
        match self {
            Self::ObjectAdded(_) => SceneEventKind::ObjectAdded,
            Self::ObjectModified(_) => SceneEventKind::ObjectModified,
            Self::ObjectRemoved(_) => SceneEventKind::ObjectRemoved,
            Self::PathCreated(_) => SceneEventKind::PathCreated,
        }
    }

    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        match *self {
            Self::ObjectAdded(id) | Self::ObjectModified(id) | Self::ObjectRemoved(id) | Self::PathCreated(id) => id,
        }
    }
}

/// Event callback. Receives the scene that fired the event.
pub type Listener = Box<dyn FnMut(&mut Scene, &SceneEvent) + Send>;

/// Handle returned by [`Scene::on`], used to deregister with [`Scene::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: SceneEventKind,
    callback: Listener,
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("scene has been disposed")]
    Disposed,
    #[error("drawing mode is not enabled")]
    NotDrawing,
    #[error("stroke has no points")]
    EmptyStroke,
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("object {index} could not be restored: {source}")]
    Materialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Raster(#[from] RasterError),
}

// =============================================================================
// SCENE
// =============================================================================

pub struct Scene {
    objects: Vec<DrawableObject>,
    active: Vec<ObjectId>,
    background: String,
    selection: bool,
    width: u32,
    height: u32,
    drawing_mode: bool,
    brush: Option<PencilBrush>,
    render_count: u64,
    render_requested: bool,
    listeners: Vec<Registration>,
    registry: HashMap<ListenerId, SceneEventKind>,
    next_listener: u64,
    queued: VecDeque<SceneEvent>,
    dispatching: bool,
    disposed: bool,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("objects", &self.objects.len())
            .field("background", &self.background)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("drawing_mode", &self.drawing_mode)
            .field("listeners", &self.registry.len())
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(SceneConfig::default())
    }
}

impl Scene {
    #[must_use]
    pub fn new(config: SceneConfig) -> Self {
        Self {
            objects: Vec::new(),
            active: Vec::new(),
            background: config.background,
            selection: config.selection,
            width: config.width,
            height: config.height,
            drawing_mode: false,
            brush: None,
            render_count: 0,
            render_requested: false,
            listeners: Vec::new(),
            registry: HashMap::new(),
            next_listener: 0,
            queued: VecDeque::new(),
            dispatching: false,
            disposed: false,
        }
    }

    fn ensure_live(&self) -> Result<(), SceneError> {
        if self.disposed { Err(SceneError::Disposed) } else { Ok(()) }
    }

    // --- Objects ---

    /// Append an object on top of the paint order. Fires `object:added`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Disposed`] after [`Scene::dispose`].
    pub fn add(&mut self, object: DrawableObject) -> Result<ObjectId, SceneError> {
        self.ensure_live()?;
        let id = object.id;
        self.objects.push(object);
        self.emit(SceneEvent::ObjectAdded(id));
        Ok(id)
    }

    /// Remove an object. Fires `object:removed`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::ObjectNotFound`] for an unknown id and
    /// [`SceneError::Disposed`] after disposal.
    pub fn remove(&mut self, id: ObjectId) -> Result<DrawableObject, SceneError> {
        self.ensure_live()?;
        let pos = self.objects.iter().position(|o| o.id == id).ok_or(SceneError::ObjectNotFound(id))?;
        let object = self.objects.remove(pos);
        self.active.retain(|a| *a != id);
        self.emit(SceneEvent::ObjectRemoved(id));
        Ok(object)
    }

    /// Apply `f` to an object and fire `object:modified`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::ObjectNotFound`] for an unknown id and
    /// [`SceneError::Disposed`] after disposal.
    pub fn modify<F>(&mut self, id: ObjectId, f: F) -> Result<(), SceneError>
    where
        F: FnOnce(&mut DrawableObject),
    {
        self.ensure_live()?;
        let object = self.object_mut(id).ok_or(SceneError::ObjectNotFound(id))?;
        f(object);
        self.emit(SceneEvent::ObjectModified(id));
        Ok(())
    }

    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&DrawableObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// Mutable access without firing an event.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut DrawableObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    /// Objects in paint order.
    #[must_use]
    pub fn objects(&self) -> &[DrawableObject] {
        &self.objects
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove every object, firing `object:removed` for each, then reset the
    /// background to empty. Callers restore the background themselves.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Disposed`] after disposal.
    pub fn clear(&mut self) -> Result<(), SceneError> {
        self.ensure_live()?;
        let removed = mem::take(&mut self.objects);
        self.active.clear();
        for object in removed {
            self.emit(SceneEvent::ObjectRemoved(object.id));
        }
        self.background.clear();
        Ok(())
    }

    // --- Selection ---

    /// Make `id` the sole active object. Ignored when selection is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::ObjectNotFound`] for an unknown id.
    pub fn set_active_object(&mut self, id: ObjectId) -> Result<(), SceneError> {
        self.set_active_objects(&[id])
    }

    /// Make `ids` the active selection. Ignored when selection is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::ObjectNotFound`] if any id is unknown; the
    /// selection is left unchanged.
    pub fn set_active_objects(&mut self, ids: &[ObjectId]) -> Result<(), SceneError> {
        if let Some(missing) = ids.iter().find(|id| self.object(**id).is_none()) {
            return Err(SceneError::ObjectNotFound(*missing));
        }
        if self.selection {
            self.active = ids.to_vec();
        }
        Ok(())
    }

    /// The first active object, if any.
    #[must_use]
    pub fn active_object(&self) -> Option<&DrawableObject> {
        self.active.first().and_then(|id| self.object(*id))
    }

    #[must_use]
    pub fn active_objects(&self) -> Vec<&DrawableObject> {
        self.active.iter().filter_map(|id| self.object(*id)).collect()
    }

    #[must_use]
    pub fn active_ids(&self) -> &[ObjectId] {
        &self.active
    }

    pub fn discard_active_object(&mut self) {
        self.active.clear();
    }

    #[must_use]
    pub fn selection_enabled(&self) -> bool {
        self.selection
    }

    // --- Background / dimensions ---

    #[must_use]
    pub fn background(&self) -> &str {
        &self.background
    }

    pub fn set_background(&mut self, color: impl Into<String>) {
        self.background = color.into();
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    // --- Rendering ---

    /// Redraw the whole scene now.
    pub fn render_all(&mut self) {
        self.render_count += 1;
        self.render_requested = false;
    }

    /// Ask for a redraw on the next frame.
    pub fn request_render_all(&mut self) {
        self.render_requested = true;
    }

    #[must_use]
    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    #[must_use]
    pub fn render_requested(&self) -> bool {
        self.render_requested
    }

    // --- Freehand ---

    pub fn set_drawing_mode(&mut self, enabled: bool) {
        self.drawing_mode = enabled;
    }

    #[must_use]
    pub fn is_drawing_mode(&self) -> bool {
        self.drawing_mode
    }

    pub fn set_brush(&mut self, brush: Option<PencilBrush>) {
        self.brush = brush;
    }

    #[must_use]
    pub fn brush(&self) -> Option<&PencilBrush> {
        self.brush.as_ref()
    }

    pub fn brush_mut(&mut self) -> Option<&mut PencilBrush> {
        self.brush.as_mut()
    }

    /// Turn captured pointer positions into a path and add it to the scene.
    ///
    /// Fires `path:created` only; the new path's fill is left unset, as the
    /// engine leaves it.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NotDrawing`] unless drawing mode is on with a
    /// brush installed, and [`SceneError::EmptyStroke`] for no points.
    pub fn commit_freehand_stroke(&mut self, points: &[Point]) -> Result<ObjectId, SceneError> {
        self.ensure_live()?;
        let brush = match (&self.brush, self.drawing_mode) {
            (Some(brush), true) => brush,
            _ => return Err(SceneError::NotDrawing),
        };
        let path = brush.build_path(points).ok_or(SceneError::EmptyStroke)?;
        let id = path.id;
        self.objects.push(path);
        self.request_render_all();
        self.emit(SceneEvent::PathCreated(id));
        Ok(id)
    }

    // --- Serialization ---

    /// Serialize the scene as `{version, background, objects}`.
    ///
    /// # Errors
    ///
    /// Returns an error if an object's extra fields cannot be serialized.
    pub fn to_serializable(&self, extra_fields: &[&str]) -> Result<Value, serde_json::Error> {
        let objects = self
            .objects
            .iter()
            .map(|o| o.to_serializable(extra_fields))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "version": SNAPSHOT_VERSION,
            "background": self.background,
            "objects": objects,
        }))
    }

    /// Replace the scene's objects and background from serialized data.
    ///
    /// Every descriptor is parsed before anything is replaced, so a bad
    /// snapshot leaves the scene untouched. No events fire and no redraw
    /// happens; `on_done` runs once after the last object is restored.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::MalformedSnapshot`] when `data` is not an object
    /// with an `objects` array, and [`SceneError::Materialize`] when a
    /// descriptor cannot be parsed.
    pub fn load_from_serializable<F>(&mut self, data: &Value, on_done: F) -> Result<(), SceneError>
    where
        F: FnOnce(&mut Scene),
    {
        self.ensure_live()?;
        let map = data
            .as_object()
            .ok_or_else(|| SceneError::MalformedSnapshot("expected an object".into()))?;
        let descriptors = map
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| SceneError::MalformedSnapshot("missing objects array".into()))?;

        let objects = descriptors
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                serde_json::from_value::<DrawableObject>(descriptor.clone())
                    .map_err(|source| SceneError::Materialize { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.objects = objects;
        self.active.clear();
        self.background = map.get("background").and_then(Value::as_str).unwrap_or_default().to_owned();
        on_done(self);
        Ok(())
    }

    /// Export the scene as a data URL.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Raster`] when rasterization fails and
    /// [`SceneError::Disposed`] after disposal.
    pub fn export_raster(&self, format: RasterFormat) -> Result<String, SceneError> {
        self.ensure_live()?;
        Ok(raster::to_data_url(self, format)?)
    }

    // --- Listeners ---

    /// Register `callback` for events of `kind`.
    pub fn on<F>(&mut self, kind: SceneEventKind, callback: F) -> ListenerId
    where
        F: FnMut(&mut Scene, &SceneEvent) + Send + 'static,
    {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.registry.insert(id, kind);
        self.listeners.push(Registration { id, kind, callback: Box::new(callback) });
        id
    }

    /// Deregister a listener. Returns `false` if it was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        if self.registry.remove(&id).is_none() {
            return false;
        }
        // During dispatch the registration may be checked out; it is dropped
        // when dispatch hands the list back.
        self.listeners.retain(|r| r.id != id);
        true
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn listener_count_for(&self, kind: SceneEventKind) -> usize {
        self.registry.values().filter(|k| **k == kind).count()
    }

    /// Tear the scene down: drop every listener and reject further mutation.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.listeners.clear();
        self.registry.clear();
        self.queued.clear();
        self.active.clear();
        self.brush = None;
        self.drawing_mode = false;
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn emit(&mut self, event: SceneEvent) {
        if self.disposed {
            return;
        }
        self.queued.push_back(event);
        if self.dispatching {
            return;
        }

        self.dispatching = true;
        while let Some(event) = self.queued.pop_front() {
            let mut registrations = mem::take(&mut self.listeners);
            for registration in &mut registrations {
                if self.disposed {
                    break;
                }
                if registration.kind == event.kind() && self.registry.contains_key(&registration.id) {
                    (registration.callback)(self, &event);
                }
            }
            registrations.retain(|r| self.registry.contains_key(&r.id));
            registrations.append(&mut self.listeners);
            self.listeners = registrations;
        }
        self.dispatching = false;
    }
}
