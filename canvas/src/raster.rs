//! Raster export: scene → SVG document → PNG data URL.
//!
//! The scene is first written out as an SVG document mirroring its paint
//! order, then parsed with `usvg` and rendered with `resvg` onto a
//! `tiny-skia` pixmap of the scene's dimensions. Text rendering uses whatever
//! fonts the host has installed.

#[cfg(test)]
#[path = "raster_test.rs"]
mod raster_test;

use std::sync::{Arc, OnceLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tiny_skia::{Pixmap, Transform};
use usvg::{Options, Tree};

use crate::consts::{PAINT_FIRST_STROKE, TRANSPARENT};
use crate::doc::{DrawableObject, ObjectKind};
use crate::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Svg,
}

impl RasterFormat {
    #[must_use]
    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Svg => "image/svg+xml",
        }
    }
}

/// Largest PNG export, in pixels (4096 × 4096).
pub const MAX_PNG_PIXELS: u64 = 4096 * 4096;

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("svg parse failed: {0}")]
    Parse(String),
    #[error("pixmap allocation failed")]
    Pixmap,
    #[error("png encode failed: {0}")]
    Encode(String),
}

/// Export `scene` as a base64 data URL in `format`.
///
/// # Errors
///
/// Returns [`RasterError::InvalidDimensions`] for a zero-sized PNG or one over
/// [`MAX_PNG_PIXELS`], and the other variants when parsing, rendering or
/// encoding fails.
pub fn to_data_url(scene: &Scene, format: RasterFormat) -> Result<String, RasterError> {
    let bytes = match format {
        RasterFormat::Svg => to_svg(scene).into_bytes(),
        RasterFormat::Png => to_png(scene)?,
    };
    Ok(format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes)))
}

/// Render `scene` to PNG bytes.
///
/// # Errors
///
/// See [`to_data_url`].
pub fn to_png(scene: &Scene) -> Result<Vec<u8>, RasterError> {
    let (width, height) = (scene.width(), scene.height());
    if width == 0 || height == 0 || u64::from(width) * u64::from(height) > MAX_PNG_PIXELS {
        return Err(RasterError::InvalidDimensions { width, height });
    }

    let mut options = Options::default();
    options.fontdb = Arc::clone(font_database());
    let tree = Tree::from_str(&to_svg(scene), &options).map_err(|e| RasterError::Parse(e.to_string()))?;

    let mut pixmap = Pixmap::new(width, height).ok_or(RasterError::Pixmap)?;
    resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());
    pixmap.encode_png().map_err(|e| RasterError::Encode(e.to_string()))
}

fn font_database() -> &'static Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS.get_or_init(|| {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        Arc::new(db)
    })
}

// =============================================================================
// SVG
// =============================================================================

/// Write `scene` as an SVG document, one element per object in paint order.
#[must_use]
pub fn to_svg(scene: &Scene) -> String {
    let (width, height) = (scene.width(), scene.height());
    let mut out = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    if !scene.background().is_empty() {
        out.push_str(&format!(r#"<rect width="100%" height="100%" fill="{}"/>"#, escape(scene.background())));
    }
    for object in scene.objects() {
        write_object(&mut out, object);
    }
    out.push_str("</svg>");
    out
}

fn write_object(out: &mut String, object: &DrawableObject) {
    let paint = paint_attrs(object);
    let element = match &object.kind {
        ObjectKind::Rect => format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}"{paint}/>"#,
            object.left,
            object.top,
            object.width.unwrap_or_default(),
            object.height.unwrap_or_default(),
        ),
        ObjectKind::Circle => {
            let r = object.radius.unwrap_or_default();
            format!(r#"<circle cx="{}" cy="{}" r="{r}"{paint}/>"#, object.left + r, object.top + r)
        }
        ObjectKind::Ellipse => {
            let rx = number(object, "rx").unwrap_or(object.width.unwrap_or_default() / 2.0);
            let ry = number(object, "ry").unwrap_or(object.height.unwrap_or_default() / 2.0);
            format!(
                r#"<ellipse cx="{}" cy="{}" rx="{rx}" ry="{ry}"{paint}/>"#,
                object.left + rx,
                object.top + ry
            )
        }
        ObjectKind::Path => {
            let d = path_data(object.path.as_deref().unwrap_or_default());
            format!(r#"<path d="{d}"{paint}/>"#)
        }
        ObjectKind::IText | ObjectKind::Text => {
            let size = object.font_size.unwrap_or(16.0);
            format!(
                r#"<text x="{}" y="{}" font-size="{size}"{paint}>{}</text>"#,
                object.left,
                object.top + size,
                escape(object.text.as_deref().unwrap_or_default()),
            )
        }
        ObjectKind::Other(_) => return,
    };
    out.push_str(&element);
}

fn paint_attrs(object: &DrawableObject) -> String {
    let mut attrs = format!(
        r#" fill="{}" stroke="{}""#,
        color(object.fill.as_deref()),
        color(object.stroke.as_deref())
    );
    if let Some(width) = object.stroke_width {
        attrs.push_str(&format!(r#" stroke-width="{width}""#));
    }
    if object.paint_first.as_deref() == Some(PAINT_FIRST_STROKE) {
        attrs.push_str(r#" paint-order="stroke""#);
    }
    if object.is_freehand() {
        attrs.push_str(r#" stroke-linecap="round" stroke-linejoin="round""#);
    }
    attrs
}

fn color(value: Option<&str>) -> String {
    match value {
        None | Some("" | TRANSPARENT) => "none".to_owned(),
        Some(c) => escape(c),
    }
}

fn number(object: &DrawableObject, key: &str) -> Option<f64> {
    object.extra.get(key).and_then(Value::as_f64)
}

/// Join path commands like `["Q", 1, 2, 3, 4]` into SVG path data.
fn path_data(commands: &[Value]) -> String {
    commands
        .iter()
        .filter_map(Value::as_array)
        .map(|command| {
            command
                .iter()
                .map(|part| match part {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
