use std::sync::Arc;

use canvas::consts::{DEFAULT_BACKGROUND, TRANSPARENT};
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};

use super::*;
use crate::store::RemoteStore;
use crate::store::test_helpers::{RecordingStore, path};

const CANVAS: &str = "abc";
const SNAPSHOT_PATH: &str = "canvas/abc/json";

fn session_on(store: &Arc<RecordingStore>, canvas_id: Option<&str>) -> (SessionController, mpsc::UnboundedReceiver<SaveReport>) {
    SessionController::new(
        SyncGateway::new(store.clone()),
        canvas_id.map(str::to_owned),
        ViewportSize::new(1280, 800),
        SessionOptions::default(),
    )
}

async fn mounted(store: &Arc<RecordingStore>) -> (SessionController, mpsc::UnboundedReceiver<SaveReport>) {
    let (mut session, reports) = session_on(store, Some(CANVAS));
    session.mount().await.unwrap();
    (session, reports)
}

fn saved(store: &RecordingStore) -> Vec<Value> {
    store.writes_to(SNAPSHOT_PATH)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

fn stroke() -> Vec<Point> {
    vec![Point::new(10.0, 10.0), Point::new(20.0, 25.0), Point::new(40.0, 30.0)]
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn mount_builds_scene_with_defaults() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = session_on(&store, Some(CANVAS));
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(matches!(session.scene(), Err(SessionError::NotMounted)));

    assert_eq!(session.mount().await.unwrap(), LoadOutcome::Empty);
    assert_eq!(session.state(), SessionState::Ready);

    let scene = session.scene().unwrap();
    assert_eq!((scene.width(), scene.height()), (1180, 650));
    assert_eq!(scene.background(), DEFAULT_BACKGROUND);
    assert!(scene.selection_enabled());
    assert_eq!(session.tool(), Tool::Select);
    assert_eq!(session.color(), DEFAULT_COLOR);
    assert_eq!(session.text_value(), DEFAULT_TEXT);
}

#[tokio::test]
async fn ready_registers_four_scene_listeners_and_one_resize_listener() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    let scene = session.scene().unwrap();
    assert_eq!(scene.listener_count(), 4);
    for kind in SceneEventKind::ALL {
        assert_eq!(scene.listener_count_for(kind), 1, "{kind}");
    }
    assert_eq!(session.viewport().listener_count(), 1);
    assert_eq!(session.registered_listeners(), 5);

    session.dispose();
    assert_eq!(session.state(), SessionState::Disposed);
    assert_eq!(session.registered_listeners(), 0);
    assert_eq!(session.viewport().listener_count(), 0);
    assert!(matches!(session.scene(), Err(SessionError::Disposed)));
}

#[tokio::test]
async fn no_autosave_while_loading() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = session_on(&store, Some(CANVAS));

    let pending = session.begin_load().unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Loading);
    assert_eq!(session.registered_listeners(), 0);

    session.add_rectangle().unwrap();
    settle().await;
    assert_eq!(store.started_writes(), 0);

    let outcome = session.finish_load(pending.await);
    assert_eq!(outcome, LoadOutcome::Empty);
    assert_eq!(session.registered_listeners(), 5);
}

#[tokio::test]
async fn mount_twice_is_rejected() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    assert!(matches!(session.begin_load(), Err(SessionError::AlreadyMounted)));

    session.dispose();
    assert!(matches!(session.begin_load(), Err(SessionError::Disposed)));
}

#[tokio::test]
async fn load_result_after_dispose_is_ignored() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = session_on(&store, Some(CANVAS));
    let pending = session.begin_load().unwrap().unwrap();

    session.dispose();
    assert_eq!(session.finish_load(pending.await), LoadOutcome::Ignored);
    assert_eq!(session.state(), SessionState::Disposed);
    assert_eq!(session.registered_listeners(), 0);
}

#[tokio::test]
async fn failed_load_leaves_scene_blank_and_ready() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = session_on(&store, Some(CANVAS));
    session.begin_load().unwrap();

    let outcome = session.finish_load(Err(SyncError::SubscriptionClosed));
    assert!(matches!(outcome, LoadOutcome::Failed(_)));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.scene().unwrap().is_empty());
    assert_eq!(session.registered_listeners(), 5);
}

#[tokio::test]
async fn unreadable_snapshot_leaves_scene_blank() {
    let store = Arc::new(RecordingStore::new());
    store
        .set(&path(SNAPSHOT_PATH), json!({"objects": [{"type": "rect", "left": "far"}]}))
        .await
        .unwrap();
    let (mut session, _reports) = session_on(&store, Some(CANVAS));

    assert!(matches!(session.mount().await.unwrap(), LoadOutcome::Failed(_)));
    assert!(session.scene().unwrap().is_empty());
}

#[tokio::test]
async fn stored_snapshot_is_restored_without_saving() {
    let store = Arc::new(RecordingStore::new());
    store
        .set(
            &path(SNAPSHOT_PATH),
            json!({
                "version": "6.4.3",
                "background": "#f8fafc",
                "objects": [
                    {"type": "rect", "left": 100, "top": 100, "width": 120, "height": 80, "fill": "#000000"},
                    {"type": "path", "path": [["M", 0, 0], ["L", 5, 5]], "fill": "red", "stroke": "#000000"},
                ],
            }),
        )
        .await
        .unwrap();
    let (mut session, _reports) = session_on(&store, Some(CANVAS));

    assert_eq!(session.mount().await.unwrap(), LoadOutcome::Restored { objects: 2 });
    let path = &session.scene().unwrap().objects()[1];
    assert_eq!(path.fill.as_deref(), Some(TRANSPARENT));
    assert_eq!(path.paint_first.as_deref(), Some("stroke"));

    settle().await;
    assert_eq!(saved(&store).len(), 1, "loading must not trigger a save");
}

// =============================================================================
// AUTO-SAVE
// =============================================================================

#[tokio::test]
async fn freehand_stroke_saves_once_with_transparent_fill() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.set_tool(Tool::Pen);
    session.commit_stroke(&stroke()).unwrap();

    assert!(store.wait_for_writes(1).await);
    settle().await;
    let saves = saved(&store);
    assert_eq!(saves.len(), 1);
    let objects = saves[0]["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0]["type"], json!("path"));
    assert_eq!(objects[0]["fill"], json!("transparent"));
    assert_eq!(objects[0]["stroke"], json!(DEFAULT_COLOR));
}

#[tokio::test]
async fn add_then_delete_saves_twice_in_order() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.add_rectangle().unwrap();
    assert_eq!(session.delete_selected().unwrap(), 1);

    assert!(store.wait_for_writes(2).await);
    settle().await;
    let saves = saved(&store);
    assert_eq!(saves.len(), 2);
    assert_eq!(saves[0]["objects"].as_array().unwrap().len(), 1);
    assert_eq!(saves[1]["objects"], json!([]));
}

#[tokio::test]
async fn saved_snapshots_carry_extra_fields_and_no_nulls() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.add_circle().unwrap();
    assert!(store.wait_for_writes(1).await);
    let circle = &saved(&store)[0]["objects"][0];
    assert_eq!(circle["type"], json!("circle"));
    assert_eq!(circle["radius"], json!(50.0));
    assert_eq!(circle["selectable"], json!(true));
    assert!(circle.get("stroke").is_none(), "unset stroke is stripped");
}

#[tokio::test]
async fn autosave_failure_is_reported() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, mut reports) = mounted(&store).await;
    store.set_fail_writes(true);

    session.add_rectangle().unwrap();
    let report = timeout(Duration::from_millis(500), reports.recv()).await.unwrap().unwrap();
    assert!(matches!(report, SaveReport::Failed { .. }));
}

#[tokio::test]
async fn no_saves_are_attempted_after_dispose() {
    let (store, gate) = RecordingStore::gated();
    let store = Arc::new(store);
    let (mut session, mut reports) = mounted(&store).await;

    session.add_rectangle().unwrap();
    session.add_circle().unwrap();
    assert!(store.wait_for_started(1).await);

    session.dispose();
    gate.add_permits(4);
    settle().await;

    assert_eq!(store.started_writes(), 1);
    assert!(reports.try_recv().is_err());
    assert!(matches!(session.add_rectangle(), Err(SessionError::Disposed)));
}

#[tokio::test]
async fn dropping_the_session_stops_autosave() {
    let (store, gate) = RecordingStore::gated();
    let store = Arc::new(store);
    let (mut session, _reports) = mounted(&store).await;

    session.add_rectangle().unwrap();
    session.add_rectangle().unwrap();
    assert!(store.wait_for_started(1).await);
    drop(session);

    gate.add_permits(4);
    settle().await;
    assert_eq!(store.started_writes(), 1);
}

// =============================================================================
// MANUAL SAVE
// =============================================================================

#[tokio::test]
async fn manual_save_without_canvas_id_aborts() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = session_on(&store, None);

    assert_eq!(session.mount().await.unwrap(), LoadOutcome::NoCanvas);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.registered_listeners(), 1);

    session.add_rectangle().unwrap();
    let err = session.save_manually().await.unwrap_err();
    assert!(matches!(err, SessionError::MissingCanvasId));
    assert_eq!(err.error_code(), "E_MISSING_CANVAS_ID");

    settle().await;
    assert_eq!(store.started_writes(), 0);
}

#[tokio::test]
async fn manual_save_discards_selection_and_writes() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.add_rectangle().unwrap();
    assert!(store.wait_for_writes(1).await);
    let renders = session.scene().unwrap().render_count();

    session.save_manually().await.unwrap();
    let scene = session.scene().unwrap();
    assert!(scene.active_object().is_none());
    assert!(scene.render_count() > renders);
    assert_eq!(saved(&store).len(), 2);
    assert_eq!(saved(&store)[1]["objects"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn manual_save_failure_is_returned() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    store.set_fail_writes(true);

    let err = session.save_manually().await.unwrap_err();
    assert!(matches!(err, SessionError::Sync(_)));
    assert!(err.retryable());
}

#[tokio::test]
async fn manual_save_during_load_overwrites_stored_scene() {
    let store = Arc::new(RecordingStore::new());
    store
        .set(
            &path(SNAPSHOT_PATH),
            json!({"version": "6.4.3", "background": "#f8fafc", "objects": [{"type": "rect", "width": 10, "height": 10}]}),
        )
        .await
        .unwrap();
    let (mut session, _reports) = session_on(&store, Some(CANVAS));

    let pending = session.begin_load().unwrap().unwrap();
    session.save_manually().await.unwrap();
    let outcome = session.finish_load(pending.await);

    assert_eq!(outcome, LoadOutcome::Restored { objects: 0 });
    assert_eq!(saved(&store).last().unwrap()["objects"], json!([]));
}

// =============================================================================
// TOOLBAR
// =============================================================================

#[tokio::test]
async fn shapes_use_fixed_geometry_and_current_color() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    session.set_color("#ff0000");

    let rect = session.add_rectangle().unwrap();
    let circle = session.add_circle().unwrap();
    session.set_text_value("Hello");
    let text = session.add_text().unwrap();

    let scene = session.scene().unwrap();
    let rect = scene.object(rect).unwrap();
    assert_eq!((rect.left, rect.top, rect.width, rect.height), (100.0, 100.0, Some(120.0), Some(80.0)));
    assert_eq!(rect.fill.as_deref(), Some("#ff0000"));

    let circle = scene.object(circle).unwrap();
    assert_eq!((circle.left, circle.top, circle.radius), (150.0, 150.0, Some(50.0)));

    let text = scene.object(text).unwrap();
    assert_eq!(text.text.as_deref(), Some("Hello"));
    assert_eq!((text.left, text.top, text.font_size), (200.0, 200.0, Some(24.0)));
    assert_eq!(text.editable, Some(true));
    assert_eq!(scene.active_object().unwrap().id, text.id);
}

#[tokio::test]
async fn pen_brush_follows_color() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.set_tool(Tool::Pen);
    assert!(session.scene().unwrap().is_drawing_mode());
    assert_eq!(session.scene().unwrap().brush().unwrap().width, 3.0);

    session.set_color("#00ff00");
    assert_eq!(session.scene().unwrap().brush().unwrap().color, "#00ff00");

    session.set_tool(Tool::Select);
    assert!(!session.scene().unwrap().is_drawing_mode());
}

#[tokio::test]
async fn pen_picks_up_color_chosen_before_switching() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.set_color("#123456");
    session.set_tool(Tool::Pen);
    assert_eq!(session.scene().unwrap().brush().unwrap().color, "#123456");
    assert_eq!(session.color(), "#123456");
}

#[tokio::test]
async fn stored_empty_snapshot_restores_zero_objects() {
    let store = Arc::new(RecordingStore::new());
    store.set(&path(SNAPSHOT_PATH), Snapshot::empty().into_value()).await.unwrap();
    let (mut session, _reports) = session_on(&store, Some(CANVAS));

    assert_eq!(session.mount().await.unwrap(), LoadOutcome::Restored { objects: 0 });
    assert_eq!(session.scene().unwrap().background(), DEFAULT_BACKGROUND);
}

#[tokio::test]
async fn stroke_needs_the_pen() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    let err = session.commit_stroke(&stroke()).unwrap_err();
    assert!(matches!(err, SessionError::PenNotActive));

    session.set_tool(Tool::Pen);
    let err = session.commit_stroke(&[]).unwrap_err();
    assert_eq!(err.error_code(), "E_EMPTY_STROKE");
}

#[tokio::test]
async fn apply_color_paints_fill_and_path_stroke() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    let rect = session.add_rectangle().unwrap();
    session.set_tool(Tool::Pen);
    let stroke_id = session.commit_stroke(&stroke()).unwrap();
    session.set_tool(Tool::Select);
    session.select(&[rect, stroke_id]).unwrap();

    session.set_color("#123456");
    assert_eq!(session.apply_color().unwrap(), 2);

    let scene = session.scene().unwrap();
    assert_eq!(scene.object(rect).unwrap().fill.as_deref(), Some("#123456"));
    assert_eq!(scene.object(rect).unwrap().stroke, None);
    assert_eq!(scene.object(stroke_id).unwrap().stroke.as_deref(), Some("#123456"));

    assert!(store.wait_for_writes(4).await);
}

#[tokio::test]
async fn apply_color_without_selection_changes_nothing() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    assert_eq!(session.apply_color().unwrap(), 0);
    assert_eq!(session.delete_selected().unwrap(), 0);
    settle().await;
    assert_eq!(store.started_writes(), 0);
}

#[tokio::test]
async fn clear_empties_scene_and_restores_background() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    session.add_rectangle().unwrap();
    session.add_circle().unwrap();

    session.clear().unwrap();
    let scene = session.scene().unwrap();
    assert!(scene.is_empty());
    assert_eq!(scene.background(), DEFAULT_BACKGROUND);

    assert!(store.wait_for_writes(4).await);
    let last = saved(&store).pop().unwrap();
    assert_eq!(last["objects"], json!([]));
    assert_eq!(last["background"], json!(DEFAULT_BACKGROUND));
}

#[tokio::test]
async fn resize_refits_scene_once_ready() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = session_on(&store, Some(CANVAS));
    session.resize(ViewportSize::new(900, 900));

    session.mount().await.unwrap();
    let scene = session.scene().unwrap();
    assert_eq!((scene.width(), scene.height()), (800, 750));

    let renders = scene.render_count();
    session.resize(ViewportSize::new(600, 500));

    let scene = session.scene().unwrap();
    assert_eq!((scene.width(), scene.height()), (500, 350));
    assert_eq!(scene.render_count(), renders + 1);

    session.resize(ViewportSize::new(50, 50));
    let scene = session.scene().unwrap();
    assert_eq!((scene.width(), scene.height()), (0, 0));
}

#[tokio::test]
async fn export_png_is_a_data_url() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    session.add_rectangle().unwrap();
    assert!(session.export_png().unwrap().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn huge_viewport_export_fails_without_ending_session() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;

    session.resize(ViewportSize::new(60_000, 60_000));
    let scene = session.scene().unwrap();
    assert_eq!((scene.width(), scene.height()), (8092, 8042));

    let err = session.export_png().unwrap_err();
    assert_eq!(err.error_code(), "E_EXPORT_FAILED");
    assert_eq!(session.state(), SessionState::Ready);
    session.add_rectangle().unwrap();
}

#[tokio::test]
async fn snapshot_matches_what_would_be_saved() {
    let store = Arc::new(RecordingStore::new());
    let (mut session, _reports) = mounted(&store).await;
    session.add_rectangle().unwrap();
    assert!(store.wait_for_writes(1).await);
    assert_eq!(session.snapshot().unwrap().into_value(), saved(&store)[0]);
}

#[test]
fn tool_names() {
    assert_eq!(Tool::from_name("pen"), Some(Tool::Pen));
    assert_eq!(Tool::from_name("select"), Some(Tool::Select));
    assert_eq!(Tool::from_name("eraser"), None);
    assert_eq!(Tool::Pen.as_str(), "pen");
}

#[test]
fn session_error_codes() {
    assert_eq!(SessionError::NotMounted.error_code(), "E_NOT_MOUNTED");
    assert_eq!(SessionError::PenNotActive.error_code(), "E_PEN_NOT_ACTIVE");
    assert_eq!(SessionError::Disposed.error_code(), "E_SESSION_DISPOSED");
    assert!(!SessionError::MissingCanvasId.retryable());
}
