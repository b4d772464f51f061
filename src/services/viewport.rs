//! Host viewport: window size and resize notification.
//!
//! The scene fills the window minus the editor chrome (toolbar and margins),
//! so its dimensions are always derived from the viewport, never set directly
//! by the client.

#[cfg(test)]
#[path = "viewport_test.rs"]
mod viewport_test;

use canvas::scene::Scene;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Horizontal space taken by editor chrome.
pub const CHROME_WIDTH: u32 = 100;

/// Vertical space taken by the toolbar and margins.
pub const CHROME_HEIGHT: u32 = 150;

/// Largest accepted viewport side. Larger client-reported sizes are clamped.
pub const MAX_VIEWPORT_SIDE: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    /// Each side is clamped to [`MAX_VIEWPORT_SIDE`].
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width: clamp_side(width), height: clamp_side(height) }
    }

    /// Scene size for this viewport, clamped at zero.
    #[must_use]
    pub fn scene_dimensions(self) -> (u32, u32) {
        (self.width.saturating_sub(CHROME_WIDTH), self.height.saturating_sub(CHROME_HEIGHT))
    }
}

const fn clamp_side(side: u32) -> u32 {
    if side > MAX_VIEWPORT_SIDE { MAX_VIEWPORT_SIDE } else { side }
}

/// Callback run on every resize with the scene it sizes.
pub type ResizeListener = Box<dyn FnMut(&mut Scene, ViewportSize) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResizeListenerId(u64);

/// The window a session's scene lives in.
pub struct Viewport {
    size: ViewportSize,
    listeners: Vec<(ResizeListenerId, ResizeListener)>,
    next_id: u64,
}

impl Viewport {
    #[must_use]
    pub fn new(size: ViewportSize) -> Self {
        Self { size, listeners: Vec::new(), next_id: 0 }
    }

    #[must_use]
    pub fn size(&self) -> ViewportSize {
        self.size
    }

    pub fn on_resize<F>(&mut self, callback: F) -> ResizeListenerId
    where
        F: FnMut(&mut Scene, ViewportSize) + Send + 'static,
    {
        self.next_id += 1;
        let id = ResizeListenerId(self.next_id);
        self.listeners.push((id, Box::new(callback)));
        id
    }

    /// Deregister a listener. Returns `false` if it was not registered.
    pub fn off_resize(&mut self, id: ResizeListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(registered, _)| *registered != id);
        self.listeners.len() != before
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Record a new window size without notifying anyone.
    pub fn set_size(&mut self, size: ViewportSize) {
        self.size = size;
    }

    /// Record the new window size and notify every listener.
    pub fn resize(&mut self, size: ViewportSize, scene: &mut Scene) {
        self.size = size;
        debug!(width = size.width, height = size.height, listeners = self.listeners.len(), "viewport resized");
        for (_, listener) in &mut self.listeners {
            listener(scene, size);
        }
    }
}

/// Size `scene` to `size` minus chrome and redraw.
pub fn fit_scene(scene: &mut Scene, size: ViewportSize) {
    let (width, height) = size.scene_dimensions();
    scene.set_dimensions(width, height);
    scene.render_all();
}
