//! Scene model and snapshot codec for the whiteboard.
//!
//! This crate owns everything that happens between a user's drawing actions
//! and the JSON document that gets persisted: the in-memory [`scene::Scene`]
//! (objects, selection, freehand brush, event listeners), the snapshot
//! [`codec`] that encodes a scene for storage and repairs snapshots on the way
//! back in, and [`raster`] export. It does no I/O; the host crate decides
//! when to save and where.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`scene`] | Scene instance, mutation events and listener registry |
//! | [`doc`] | Drawable object descriptors, object kinds and the pencil brush |
//! | [`codec`] | Snapshot encode/decode, freehand normalization, sentinel stripping |
//! | [`raster`] | SVG and PNG export of a scene |
//! | [`consts`] | Shared constants (background, paint order, brush width) |

pub mod codec;
pub mod consts;
pub mod doc;
pub mod raster;
pub mod scene;
