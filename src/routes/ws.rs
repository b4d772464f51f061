//! WebSocket handlers: editing sessions and the live directory feed.
//!
//! DESIGN
//! ======
//! A session socket owns one `SessionController`. On upgrade the session
//! starts its one-shot load and the connection enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Load completes → `finish_load` → `session:ready`
//! - Auto-save report → `save:error` / `save:dropped`
//! - Record change → `canvas:record`
//!
//! Client frames are served while the load is still running, so a manual
//! save sent before `session:ready` writes the blank scene.
//!
//! Handler functions validate input, drive the session and return an
//! `Outcome`; the dispatch layer turns that into the reply frame.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → session created, load started
//! 2. Client sends frames → dispatch → reply
//! 3. Load finishes → `session:ready`
//! 4. Close → session disposed (listeners removed, auto-save stopped)

#[cfg(test)]
#[path = "ws_test.rs"]
mod ws_test;

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use canvas::doc::{ObjectId, Point};
use canvas::raster::RasterFormat;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::canvas::{to_detail, to_summary};
use crate::frame::{Data, Frame, Status, keys};
use crate::services::autosave::SaveReport;
use crate::services::gateway::{self, Subscription};
use crate::services::session::{LoadOutcome, PendingLoad, SessionController, SessionOptions, Tool};
use crate::services::viewport::ViewportSize;
use crate::state::{AppState, CanvasRecord};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer turns it into
/// the reply frame.
enum Outcome {
    /// Send done+data to the client.
    Reply(Data),
    /// Send empty done to the client.
    Done,
    /// Send done+data under another syscall (`canvas:save` → `save:ok`).
    Renamed { syscall: String, data: Data },
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/canvas/:id/session`: edit one canvas.
pub async fn handle_session(
    State(state): State<AppState>,
    Path(canvas_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let viewport = viewport_from_query(&params, state.config.default_viewport);
    ws.on_upgrade(move |socket| run_session(socket, state, Some(canvas_id), viewport))
}

/// `GET /api/session`: a session with no canvas behind it. Nothing loads
/// and nothing saves.
pub async fn handle_scratch_session(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let viewport = viewport_from_query(&params, state.config.default_viewport);
    ws.on_upgrade(move |socket| run_session(socket, state, None, viewport))
}

/// `GET /api/canvas/feed`: the directory, re-sent after every change.
pub async fn handle_feed(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_feed(socket, state))
}

fn viewport_from_query(params: &HashMap<String, String>, default: ViewportSize) -> ViewportSize {
    let dimension = |key: &str, fallback: u32| params.get(key).and_then(|v| v.parse().ok()).unwrap_or(fallback);
    ViewportSize::new(dimension("width", default.width), dimension("height", default.height))
}

// =============================================================================
// SESSION CONNECTION
// =============================================================================

async fn run_session(mut socket: WebSocket, state: AppState, canvas_id: Option<String>, viewport: ViewportSize) {
    if let Some(id) = canvas_id.as_deref() {
        if let Err(e) = gateway::canvas_path(id) {
            let frame = Frame::failure("error", &e);
            let _ = send_frame(&mut socket, &frame).await;
            return;
        }
    }

    let options = SessionOptions { autosave_queue_capacity: state.config.autosave_queue_capacity };
    let (mut session, mut reports) = SessionController::new(state.gateway.clone(), canvas_id.clone(), viewport, options);

    let pending = match session.begin_load() {
        Ok(pending) => pending,
        Err(e) => {
            let frame = Frame::failure("error", &e);
            let _ = send_frame(&mut socket, &frame).await;
            return;
        }
    };

    let (record_tx, mut record_rx) = mpsc::unbounded_channel::<Option<CanvasRecord>>();
    let _subscription: Option<Subscription> = match canvas_id.as_deref() {
        Some(id) => state
            .gateway
            .subscribe(id, move |record| {
                // Receiver gone means the connection is closing.
                let _ = record_tx.send(record);
            })
            .ok(),
        None => None,
    };

    let mut loading = pending.is_some();
    let mut load: PendingLoad = pending.unwrap_or_else(|| Box::pin(futures::future::pending()));
    if !loading {
        let ready = ready_frame(&session, &LoadOutcome::NoCanvas);
        if send_frame(&mut socket, &ready).await.is_err() {
            return;
        }
    }

    info!(canvas_id = canvas_id.as_deref().unwrap_or("-"), "ws: session connected");

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&mut session, text.as_str()).await {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            result = &mut load, if loading => {
                loading = false;
                let outcome = session.finish_load(result);
                if send_frame(&mut socket, &ready_frame(&session, &outcome)).await.is_err() {
                    break;
                }
            }
            Some(report) = reports.recv() => {
                if send_frame(&mut socket, &report_frame(report)).await.is_err() {
                    break;
                }
            }
            Some(record) = record_rx.recv() => {
                if send_frame(&mut socket, &record_frame(record.as_ref())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.dispose();
    info!(canvas_id = canvas_id.as_deref().unwrap_or("-"), "ws: session disconnected");
}

// =============================================================================
// FEED CONNECTION
// =============================================================================

async fn run_feed(mut socket: WebSocket, state: AppState) {
    let mut list = state.directory.list();
    info!("ws: directory feed connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            Some(records) = list.next() => {
                let summaries: Vec<_> = records.iter().map(to_summary).collect();
                let frame = Frame::notify("canvas:list").with_data("canvases", json!(summaries));
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }
    info!("ws: directory feed disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the client.
///
/// Kept apart from the socket so tests can drive a session frame by frame.
async fn process_inbound_text(session: &mut SessionController, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "ws: invalid inbound frame");
            let err = Frame::notify("error").with_data(keys::MESSAGE, format!("invalid json: {e}"));
            return vec![err];
        }
    };
    if req.canvas_id.is_none() {
        req.canvas_id = session.canvas_id().map(str::to_owned);
    }
    info!(id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "tool" => handle_tool(session, &req),
        "color" => handle_color(session, &req),
        "text" => handle_text(session, &req),
        "shape" => handle_shape(session, &req),
        "selection" => handle_selection(session, &req),
        "stroke" => handle_stroke(session, &req),
        "viewport" => handle_viewport(session, &req),
        "canvas" => handle_canvas(session, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Renamed { syscall, data }) => vec![req.done_with(data).with_syscall(syscall)],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// TOOLBAR HANDLERS
// =============================================================================

fn handle_tool(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    let name = match req.op() {
        "set" => req.data_str("tool").unwrap_or_default(),
        op => op,
    };
    let Some(tool) = Tool::from_name(name) else {
        return Err(req.error(format!("unknown tool: {name}")));
    };
    session.set_tool(tool);
    Ok(Outcome::Reply(data_of([("tool", json!(tool.as_str()))])))
}

fn handle_color(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "set" => {
            let Some(color) = req.data_str("color").filter(|c| !c.trim().is_empty()) else {
                return Err(req.error("color required"));
            };
            session.set_color(color);
            Ok(Outcome::Reply(data_of([("color", json!(session.color()))])))
        }
        op => Err(req.error(format!("unknown color op: {op}"))),
    }
}

fn handle_text(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "set" => {
            let Some(text) = req.data_str("text") else {
                return Err(req.error("text required"));
            };
            session.set_text_value(text);
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown text op: {op}"))),
    }
}

fn handle_shape(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    let result = match req.op() {
        "rect" => session.add_rectangle(),
        "circle" => session.add_circle(),
        "text" => {
            if let Some(text) = req.data_str("text") {
                session.set_text_value(text);
            }
            session.add_text()
        }
        op => return Err(req.error(format!("unknown shape op: {op}"))),
    };
    let id = result.map_err(|e| req.error_from(&e))?;
    Ok(Outcome::Reply(data_of([("id", json!(id))])))
}

fn handle_selection(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "set" => {
            let ids = req
                .data
                .get("ids")
                .cloned()
                .map(serde_json::from_value::<Vec<ObjectId>>)
                .transpose()
                .map_err(|e| req.error(format!("invalid ids: {e}")))?
                .unwrap_or_default();
            session.select(&ids).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "delete" => {
            let removed = session.delete_selected().map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of([("removed", json!(removed))])))
        }
        "color" => {
            if let Some(color) = req.data_str("color") {
                session.set_color(color);
            }
            let changed = session.apply_color().map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of([("changed", json!(changed))])))
        }
        op => Err(req.error(format!("unknown selection op: {op}"))),
    }
}

fn handle_stroke(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "commit" => {
            let Some(points) = req.data.get("points").cloned() else {
                return Err(req.error("points required"));
            };
            let points: Vec<Point> =
                serde_json::from_value(points).map_err(|e| req.error(format!("invalid points: {e}")))?;
            let id = session.commit_stroke(&points).map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of([("id", json!(id))])))
        }
        op => Err(req.error(format!("unknown stroke op: {op}"))),
    }
}

fn handle_viewport(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "resize" => {
            let (Some(width), Some(height)) = (req.data_u32("width"), req.data_u32("height")) else {
                return Err(req.error("width and height required"));
            };
            session.resize(ViewportSize::new(width, height));
            let (scene_width, scene_height) = ViewportSize::new(width, height).scene_dimensions();
            Ok(Outcome::Reply(data_of([("width", json!(scene_width)), ("height", json!(scene_height))])))
        }
        op => Err(req.error(format!("unknown viewport op: {op}"))),
    }
}

async fn handle_canvas(session: &mut SessionController, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "save" => match session.save_manually().await {
            Ok(()) => Ok(Outcome::Renamed { syscall: "save:ok".into(), data: Data::new() }),
            Err(e) => Err(req.error_from(&e).with_syscall("save:error")),
        },
        "export" => {
            let format = match req.data_str("format").unwrap_or("png") {
                "png" => RasterFormat::Png,
                "svg" => RasterFormat::Svg,
                other => return Err(req.error(format!("unknown export format: {other}"))),
            };
            let url = session.export(format).map_err(|e| req.error_from(&e))?;
            let syscall = match format {
                RasterFormat::Png => "export:png",
                RasterFormat::Svg => "export:svg",
            };
            Ok(Outcome::Renamed { syscall: syscall.into(), data: data_of([("url", json!(url))]) })
        }
        "clear" => {
            session.clear().map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "snapshot" => {
            let snapshot = session.snapshot().map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of([("snapshot", snapshot.into_value())])))
        }
        op => Err(req.error(format!("unknown canvas op: {op}"))),
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

fn ready_frame(session: &SessionController, outcome: &LoadOutcome) -> Frame {
    let (label, objects, message) = match outcome {
        LoadOutcome::Restored { objects } => ("restored", *objects, None),
        LoadOutcome::Empty => ("empty", 0, None),
        LoadOutcome::Failed(message) => ("failed", 0, Some(message.clone())),
        LoadOutcome::NoCanvas => ("no_canvas", 0, None),
        LoadOutcome::Ignored => ("ignored", 0, None),
    };
    let mut frame = Frame::notify("session:ready")
        .with_data("outcome", label)
        .with_data("objects", json!(objects));
    if let Some(message) = message {
        frame = frame.with_data(keys::MESSAGE, message);
    }
    if let Some(id) = session.canvas_id() {
        frame = frame.with_canvas_id(id);
    }
    frame
}

fn report_frame(report: SaveReport) -> Frame {
    match report {
        SaveReport::Failed { canvas_id, error } => Frame::failure("save:error", &error).with_canvas_id(canvas_id),
        SaveReport::Dropped { canvas_id } => Frame::notify("save:dropped")
            .with_canvas_id(canvas_id)
            .with_data(keys::MESSAGE, "auto-save queue full"),
    }
}

fn record_frame(record: Option<&CanvasRecord>) -> Frame {
    let record = record.map_or(Value::Null, |r| json!(to_detail(r)));
    Frame::notify("canvas:record").with_data("record", record)
}

// =============================================================================
// HELPERS
// =============================================================================

fn data_of<const N: usize>(entries: [(&str, Value); N]) -> Data {
    entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data_str(keys::CODE).unwrap_or("-");
        let message = frame.data_str(keys::MESSAGE).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
