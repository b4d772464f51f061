//! Shared constants for the canvas crate.

// ── Scene ───────────────────────────────────────────────────────

/// Background color applied to new and cleared scenes.
pub const DEFAULT_BACKGROUND: &str = "#f8fafc";

/// Version tag written into every snapshot.
pub const SNAPSHOT_VERSION: &str = "6.4.3";

// ── Paint ───────────────────────────────────────────────────────

/// Fill value that leaves a shape's interior unpainted.
pub const TRANSPARENT: &str = "transparent";

/// `paintFirst` value that draws the stroke before the fill.
pub const PAINT_FIRST_STROKE: &str = "stroke";

/// `paintFirst` value that draws the fill before the stroke (engine default).
pub const PAINT_FIRST_FILL: &str = "fill";

/// Fill assigned by the engine to shapes created without one.
pub const DEFAULT_FILL: &str = "rgb(0,0,0)";

// ── Freehand ────────────────────────────────────────────────────

/// Stroke width of the pencil brush, in scene units.
pub const PENCIL_WIDTH: f64 = 3.0;
