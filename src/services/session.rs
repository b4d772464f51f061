//! Canvas session: one scene, its toolbar, and its save pipeline.
//!
//! DESIGN
//! ======
//! A session owns one `Scene` for one canvas id and moves through
//! `Uninitialized → Loading → Ready → Disposed`.
//!
//! - `begin_load` builds the scene (background `#f8fafc`, selection on,
//!   sized to the viewport minus chrome) and hands back the one-shot load as
//!   an owned future, so the host keeps serving the client while it runs.
//! - `finish_load` decodes whatever arrived (a failed load leaves the scene
//!   blank), then registers the four mutation listeners and the resize
//!   listener and enters `Ready`.
//! - In `Ready` every committed mutation encodes the scene and queues it on
//!   the session's auto-save worker. A just-drawn freehand path is made
//!   transparent before it is encoded.
//! - `dispose` removes every listener the session registered, disposes the
//!   scene and stops the auto-save worker.
//!
//! Manual save is not gated on `Ready`: a save issued while the load is still
//! in flight writes the blank scene over the stored one, and the load then
//! reads that blank scene back.
//!
//! A session without a canvas id has nothing to load or save to. It goes
//! straight to `Ready` with only the resize listener.
//!
//! ERROR HANDLING
//! ==============
//! Actions return `SessionError`. Auto-save failures are never returned from
//! an action; they arrive on the report channel handed out by `new`.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::future::Future;
use std::pin::Pin;

use canvas::codec::{self, CodecError, DEFAULT_EXTRA_FIELDS, Snapshot};
use canvas::consts::DEFAULT_BACKGROUND;
use canvas::doc::{DrawableObject, ObjectId, PencilBrush, Point};
use canvas::raster::RasterFormat;
use canvas::scene::{ListenerId, Scene, SceneConfig, SceneError, SceneEvent, SceneEventKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::autosave::{self, AutoSaver, SaveReport};
use super::gateway::{SyncError, SyncGateway};
use super::viewport::{ResizeListenerId, Viewport, ViewportSize, fit_scene};
use crate::config::DEFAULT_AUTOSAVE_QUEUE_CAPACITY;
use crate::frame::ErrorCode;

/// Drawing color before the user picks one.
pub const DEFAULT_COLOR: &str = "#000000";

/// Content of new text objects before the user types any.
pub const DEFAULT_TEXT: &str = "Enter text";

const RECT_ORIGIN: (f64, f64) = (100.0, 100.0);
const RECT_SIZE: (f64, f64) = (120.0, 80.0);
const CIRCLE_ORIGIN: (f64, f64) = (150.0, 150.0);
const CIRCLE_RADIUS: f64 = 50.0;
const TEXT_ORIGIN: (f64, f64) = (200.0, 200.0);
const TEXT_FONT_SIZE: f64 = 24.0;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Disposed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tool {
    #[default]
    Select,
    Pen,
}

impl Tool {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "select" => Some(Self::Select),
            "pen" => Some(Self::Pen),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Pen => "pen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub autosave_queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { autosave_queue_capacity: DEFAULT_AUTOSAVE_QUEUE_CAPACITY }
    }
}

/// The one-shot load started by [`SessionController::begin_load`].
pub type PendingLoad = Pin<Box<dyn Future<Output = Result<Option<Snapshot>, SyncError>> + Send>>;

/// What [`SessionController::finish_load`] did with a load result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A snapshot was decoded into the scene.
    Restored { objects: usize },
    /// Nothing stored; the scene stays blank.
    Empty,
    /// The load or decode failed; the scene stays blank.
    Failed(String),
    /// The session has no canvas id; nothing was loaded.
    NoCanvas,
    /// The session was not loading (already disposed); result dropped.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no canvas id; nothing to save to")]
    MissingCanvasId,
    #[error("session has no scene yet")]
    NotMounted,
    #[error("session already mounted")]
    AlreadyMounted,
    #[error("session disposed")]
    Disposed,
    #[error("freehand strokes need the pen tool")]
    PenNotActive,
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCanvasId => "E_MISSING_CANVAS_ID",
            Self::NotMounted => "E_NOT_MOUNTED",
            Self::AlreadyMounted => "E_ALREADY_MOUNTED",
            Self::Disposed => "E_SESSION_DISPOSED",
            Self::PenNotActive => "E_PEN_NOT_ACTIVE",
            Self::Scene(SceneError::ObjectNotFound(_)) => "E_OBJECT_NOT_FOUND",
            Self::Scene(SceneError::EmptyStroke) => "E_EMPTY_STROKE",
            Self::Scene(SceneError::Raster(_)) => "E_EXPORT_FAILED",
            Self::Scene(_) => "E_SCENE",
            Self::Codec(_) => "E_CODEC",
            Self::Sync(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Sync(e) if e.retryable())
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct SessionController {
    gateway: SyncGateway,
    canvas_id: Option<String>,
    state: SessionState,
    scene: Option<Scene>,
    viewport: Viewport,
    tool: Tool,
    color: String,
    text_value: String,
    autosaver: Option<AutoSaver>,
    scene_listeners: Vec<ListenerId>,
    resize_listener: Option<ResizeListenerId>,
}

impl SessionController {
    /// Create a session for `canvas_id` and, when there is one, its auto-save
    /// worker. Must be called inside a tokio runtime.
    ///
    /// The returned channel carries auto-save failures.
    #[must_use]
    pub fn new(
        gateway: SyncGateway,
        canvas_id: Option<String>,
        viewport: ViewportSize,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SaveReport>) {
        let canvas_id = canvas_id.filter(|id| !id.trim().is_empty());
        let (autosaver, reports) = match &canvas_id {
            Some(id) => {
                let (saver, reports) = autosave::spawn(gateway.clone(), id, options.autosave_queue_capacity);
                (Some(saver), reports)
            }
            // Sender dropped at once: the host sees a closed, empty channel.
            None => (None, mpsc::unbounded_channel().1),
        };

        let session = Self {
            gateway,
            canvas_id,
            state: SessionState::Uninitialized,
            scene: None,
            viewport: Viewport::new(viewport),
            tool: Tool::default(),
            color: DEFAULT_COLOR.to_owned(),
            text_value: DEFAULT_TEXT.to_owned(),
            autosaver,
            scene_listeners: Vec::new(),
            resize_listener: None,
        };
        (session, reports)
    }

    // --- Lifecycle ---

    /// Build the scene and start the one-shot load.
    ///
    /// Returns `None` when the session has no canvas id; it is then already
    /// `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyMounted`] unless the session is
    /// `Uninitialized` and [`SessionError::Disposed`] after disposal.
    pub fn begin_load(&mut self) -> Result<Option<PendingLoad>, SessionError> {
        match self.state {
            SessionState::Uninitialized => {}
            SessionState::Disposed => return Err(SessionError::Disposed),
            SessionState::Loading | SessionState::Ready => return Err(SessionError::AlreadyMounted),
        }

        let (width, height) = self.viewport.size().scene_dimensions();
        let mut scene = Scene::new(SceneConfig {
            background: DEFAULT_BACKGROUND.to_owned(),
            selection: true,
            width,
            height,
        });
        apply_tool(&mut scene, self.tool, &self.color);
        self.scene = Some(scene);

        let Some(canvas_id) = self.canvas_id.clone() else {
            self.resize_listener = Some(self.viewport.on_resize(fit_scene));
            self.state = SessionState::Ready;
            info!("session mounted without canvas id");
            return Ok(None);
        };

        self.state = SessionState::Loading;
        info!(%canvas_id, width, height, "session loading");
        let gateway = self.gateway.clone();
        Ok(Some(Box::pin(async move { gateway.load_once(&canvas_id).await })))
    }

    /// Apply the load result and enter `Ready`.
    pub fn finish_load(&mut self, result: Result<Option<Snapshot>, SyncError>) -> LoadOutcome {
        if self.state != SessionState::Loading {
            debug!(state = ?self.state, "load result ignored");
            return LoadOutcome::Ignored;
        }
        let canvas_id = self.canvas_id.clone().unwrap_or_default();
        let Some(scene) = self.scene.as_mut() else {
            return LoadOutcome::Ignored;
        };

        let outcome = match result {
            Ok(Some(snapshot)) => match codec::decode(Some(&snapshot), scene) {
                Ok(()) => LoadOutcome::Restored { objects: scene.len() },
                Err(e) => {
                    warn!(%canvas_id, error = %e, "stored snapshot unreadable; starting blank");
                    LoadOutcome::Failed(e.to_string())
                }
            },
            Ok(None) => LoadOutcome::Empty,
            Err(e) => {
                warn!(%canvas_id, error = %e, "snapshot load failed; starting blank");
                LoadOutcome::Failed(e.to_string())
            }
        };

        self.attach_listeners();
        self.state = SessionState::Ready;
        info!(%canvas_id, ?outcome, "session ready");
        outcome
    }

    /// `begin_load` then `finish_load`, awaiting the load in between.
    ///
    /// # Errors
    ///
    /// Same as [`SessionController::begin_load`].
    pub async fn mount(&mut self) -> Result<LoadOutcome, SessionError> {
        match self.begin_load()? {
            Some(pending) => {
                let result = pending.await;
                Ok(self.finish_load(result))
            }
            None => Ok(LoadOutcome::NoCanvas),
        }
    }

    fn attach_listeners(&mut self) {
        let (Some(scene), Some(saver)) = (self.scene.as_mut(), self.autosaver.as_ref()) else {
            return;
        };

        for kind in [SceneEventKind::ObjectAdded, SceneEventKind::ObjectModified, SceneEventKind::ObjectRemoved] {
            let saver = saver.clone();
            let id = scene.on(kind, move |scene: &mut Scene, _event: &SceneEvent| autosave(scene, &saver));
            self.scene_listeners.push(id);
        }

        let saver = saver.clone();
        let id = scene.on(SceneEventKind::PathCreated, move |scene: &mut Scene, event: &SceneEvent| {
            if let Some(path) = scene.object_mut(event.object_id()) {
                codec::normalize_freehand(path);
            }
            autosave(scene, &saver);
        });
        self.scene_listeners.push(id);

        self.resize_listener = Some(self.viewport.on_resize(fit_scene));
    }

    /// Deregister every listener, dispose the scene and stop auto-save.
    /// Idempotent.
    pub fn dispose(&mut self) {
        if self.state == SessionState::Disposed {
            return;
        }
        if let Some(scene) = self.scene.as_mut() {
            for id in self.scene_listeners.drain(..) {
                scene.off(id);
            }
            scene.dispose();
        }
        if let Some(id) = self.resize_listener.take() {
            self.viewport.off_resize(id);
        }
        if let Some(saver) = self.autosaver.take() {
            saver.dispose();
        }
        self.state = SessionState::Disposed;
        debug!(canvas_id = self.canvas_id.as_deref().unwrap_or("-"), "session disposed");
    }

    // --- Toolbar ---

    /// Switch tools. The pen installs a pencil brush in the current color.
    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        let color = self.color.clone();
        if let Some(scene) = self.live_scene() {
            apply_tool(scene, tool, &color);
        }
    }

    /// Pick the drawing color; the pen's brush follows it.
    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
        if self.tool == Tool::Pen {
            let color = self.color.clone();
            if let Some(brush) = self.live_scene().and_then(Scene::brush_mut) {
                brush.color = color;
            }
        }
    }

    pub fn set_text_value(&mut self, text: impl Into<String>) {
        self.text_value = text.into();
    }

    /// Add a 120×80 rectangle at (100, 100) and select it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotMounted`] before `begin_load` and
    /// [`SessionError::Disposed`] after `dispose`.
    pub fn add_rectangle(&mut self) -> Result<ObjectId, SessionError> {
        let rect = DrawableObject::rect(RECT_ORIGIN.0, RECT_ORIGIN.1, RECT_SIZE.0, RECT_SIZE.1, &self.color);
        self.add_and_select(rect)
    }

    /// Add a circle of radius 50 at (150, 150) and select it.
    ///
    /// # Errors
    ///
    /// As for [`SessionController::add_rectangle`].
    pub fn add_circle(&mut self) -> Result<ObjectId, SessionError> {
        let circle = DrawableObject::circle(CIRCLE_ORIGIN.0, CIRCLE_ORIGIN.1, CIRCLE_RADIUS, &self.color);
        self.add_and_select(circle)
    }

    /// Add editable text holding the current text value at (200, 200) and
    /// select it.
    ///
    /// # Errors
    ///
    /// As for [`SessionController::add_rectangle`].
    pub fn add_text(&mut self) -> Result<ObjectId, SessionError> {
        let text = DrawableObject::text(&self.text_value, TEXT_ORIGIN.0, TEXT_ORIGIN.1, TEXT_FONT_SIZE, &self.color);
        self.add_and_select(text)
    }

    fn add_and_select(&mut self, object: DrawableObject) -> Result<ObjectId, SessionError> {
        let scene = self.scene_mut()?;
        let id = scene.add(object)?;
        scene.set_active_object(id)?;
        Ok(id)
    }

    /// Replace the selection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Scene`] if any id is unknown.
    pub fn select(&mut self, ids: &[ObjectId]) -> Result<(), SessionError> {
        self.scene_mut()?.set_active_objects(ids)?;
        Ok(())
    }

    /// Remove the selected objects. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// As for [`SessionController::add_rectangle`].
    pub fn delete_selected(&mut self) -> Result<usize, SessionError> {
        let scene = self.scene_mut()?;
        let ids = scene.active_ids().to_vec();
        if ids.is_empty() {
            return Ok(0);
        }
        for id in &ids {
            scene.remove(*id)?;
        }
        scene.discard_active_object();
        scene.request_render_all();
        Ok(ids.len())
    }

    /// Paint the selection in the current color: fill, and stroke too for
    /// freehand paths. Returns how many objects changed.
    ///
    /// # Errors
    ///
    /// As for [`SessionController::add_rectangle`].
    pub fn apply_color(&mut self) -> Result<usize, SessionError> {
        let color = self.color.clone();
        let scene = self.scene_mut()?;
        let ids = scene.active_ids().to_vec();
        for id in &ids {
            let color = color.clone();
            scene.modify(*id, move |object| {
                object.fill = Some(color.clone());
                if object.is_freehand() {
                    object.stroke = Some(color);
                }
            })?;
        }
        if !ids.is_empty() {
            scene.render_all();
        }
        Ok(ids.len())
    }

    /// Finish a freehand stroke drawn with the pen.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PenNotActive`] unless the pen tool is active
    /// and [`SessionError::Scene`] for an empty stroke.
    pub fn commit_stroke(&mut self, points: &[Point]) -> Result<ObjectId, SessionError> {
        if self.tool != Tool::Pen {
            return Err(SessionError::PenNotActive);
        }
        Ok(self.scene_mut()?.commit_freehand_stroke(points)?)
    }

    /// Remove every object and restore the default background.
    ///
    /// # Errors
    ///
    /// As for [`SessionController::add_rectangle`].
    pub fn clear(&mut self) -> Result<(), SessionError> {
        let scene = self.scene_mut()?;
        scene.clear()?;
        scene.set_background(DEFAULT_BACKGROUND);
        scene.render_all();
        Ok(())
    }

    /// The scene as a PNG data URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Scene`] if rasterization fails.
    pub fn export_png(&self) -> Result<String, SessionError> {
        self.export(RasterFormat::Png)
    }

    /// The scene as a data URL in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Scene`] if rasterization fails.
    pub fn export(&self, format: RasterFormat) -> Result<String, SessionError> {
        Ok(self.scene()?.export_raster(format)?)
    }

    /// Save now and wait for the store to answer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingCanvasId`] without writing when the
    /// session has no canvas id, and [`SessionError::Sync`] if the write
    /// fails.
    pub async fn save_manually(&mut self) -> Result<(), SessionError> {
        let Some(canvas_id) = self.canvas_id.clone() else {
            return Err(SessionError::MissingCanvasId);
        };
        let scene = self.scene_mut()?;
        scene.discard_active_object();
        scene.render_all();
        let snapshot = codec::encode(scene, DEFAULT_EXTRA_FIELDS)?;

        self.gateway.save(&canvas_id, &snapshot).await?;
        info!(%canvas_id, objects = snapshot.objects().len(), "manual save");
        Ok(())
    }

    /// Record a new window size; once `Ready` the scene follows it.
    pub fn resize(&mut self, size: ViewportSize) {
        match self.scene.as_mut() {
            Some(scene) if self.state != SessionState::Disposed => self.viewport.resize(size, scene),
            _ => self.viewport.set_size(size),
        }
    }

    /// Encode the scene as it would be saved.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Codec`] if encoding fails.
    pub fn snapshot(&self) -> Result<Snapshot, SessionError> {
        Ok(codec::encode(self.scene()?, DEFAULT_EXTRA_FIELDS)?)
    }

    // --- Accessors ---

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn canvas_id(&self) -> Option<&str> {
        self.canvas_id.as_deref()
    }

    #[must_use]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    #[must_use]
    pub fn color(&self) -> &str {
        &self.color
    }

    #[must_use]
    pub fn text_value(&self) -> &str {
        &self.text_value
    }

    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// The scene, once mounted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotMounted`] before `begin_load` and
    /// [`SessionError::Disposed`] after `dispose`.
    pub fn scene(&self) -> Result<&Scene, SessionError> {
        if self.state == SessionState::Disposed {
            return Err(SessionError::Disposed);
        }
        self.scene.as_ref().ok_or(SessionError::NotMounted)
    }

    fn scene_mut(&mut self) -> Result<&mut Scene, SessionError> {
        if self.state == SessionState::Disposed {
            return Err(SessionError::Disposed);
        }
        self.scene.as_mut().ok_or(SessionError::NotMounted)
    }

    fn live_scene(&mut self) -> Option<&mut Scene> {
        self.scene_mut().ok()
    }

    /// Listeners this session currently has registered: scene and viewport.
    #[must_use]
    pub fn registered_listeners(&self) -> usize {
        self.scene_listeners.len() + usize::from(self.resize_listener.is_some())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn apply_tool(scene: &mut Scene, tool: Tool, color: &str) {
    match tool {
        Tool::Pen => {
            scene.set_drawing_mode(true);
            scene.set_brush(Some(PencilBrush::new(color)));
        }
        Tool::Select => scene.set_drawing_mode(false),
    }
}

/// Encode the scene and queue it on the auto-save worker.
fn autosave(scene: &mut Scene, saver: &AutoSaver) {
    scene.render_all();
    match codec::encode(scene, DEFAULT_EXTRA_FIELDS) {
        Ok(snapshot) => {
            saver.enqueue(snapshot);
        }
        Err(e) => warn!(canvas_id = %saver.canvas_id(), error = %e, "auto-save encode failed"),
    }
}
