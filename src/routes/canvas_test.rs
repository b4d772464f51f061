use serde_json::json;

use super::*;
use crate::routes::test_helpers::spawn_server;
use crate::state::test_helpers;
use crate::store::test_helpers::path;

#[tokio::test]
async fn list_starts_empty_and_grows() {
    let state = test_helpers::test_app_state();
    assert!(list_canvases(State(state.clone())).await.unwrap().0.is_empty());

    let (status, Json(body)) = create_canvas(State(state.clone())).await.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_owned();

    let list = list_canvases(State(state)).await.unwrap().0;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, id);
    assert!(list[0].name.starts_with("Canvas "));
    assert!(list[0].created_at.is_some());
    assert!(list[0].snapshot.is_none());
}

#[tokio::test]
async fn get_canvas_returns_snapshot() {
    let state = test_helpers::test_app_state();
    let id = state.directory.create_new().await.unwrap();

    let Json(canvas) = get_canvas(State(state), Path(id.clone())).await.unwrap();
    assert_eq!(canvas.id, id);
    assert_eq!(canvas.snapshot.unwrap()["objects"], json!([]));
}

#[tokio::test]
async fn get_canvas_defaults_missing_name() {
    let state = test_helpers::test_app_state();
    state.store.set(&path("canvas/legacy"), json!({"json": "{}"})).await.unwrap();

    let Json(canvas) = get_canvas(State(state), Path("legacy".into())).await.unwrap();
    assert_eq!(canvas.name, "Untitled Canvas");
    assert!(canvas.snapshot.is_none());
}

#[tokio::test]
async fn get_missing_canvas_is_not_found() {
    let state = test_helpers::test_app_state();
    let err = get_canvas(State(state.clone()), Path("nope".into())).await.unwrap_err();
    assert_eq!(err, StatusCode::NOT_FOUND);

    let err = get_canvas(State(state), Path("bad.id".into())).await.unwrap_err();
    assert_eq!(err, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_failure_is_server_error() {
    let (state, store) = test_helpers::test_app_state_recording();
    store.set_fail_writes(true);
    let err = create_canvas(State(state)).await.unwrap_err();
    assert_eq!(err, StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn summary_serializes_camel_case() {
    let record = CanvasRecord::from_stored("a", json!({"name": "A", "createdAt": 7})).unwrap();
    let value = serde_json::to_value(to_summary(&record)).unwrap();
    assert_eq!(value, json!({"id": "a", "name": "A", "createdAt": 7}));
}

#[tokio::test]
async fn router_serves_health_and_json_404() {
    let addr = spawn_server(test_helpers::test_app_state()).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("http://{addr}/healthz")).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 200);

    let missing = client.get(format!("http://{addr}/no/such/page")).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body, json!({"error": "not found"}));
}

#[tokio::test]
async fn router_creates_lists_and_serves_editor_view() {
    let addr = spawn_server(test_helpers::test_app_state()).await;
    let client = reqwest::Client::new();

    let created = client.post(format!("http://{addr}/api/canvas")).send().await.unwrap();
    assert_eq!(created.status().as_u16(), 201);
    let id = created.json::<Value>().await.unwrap()["id"].as_str().unwrap().to_owned();

    let list: Value = client.get(format!("http://{addr}/")).send().await.unwrap().json().await.unwrap();
    assert_eq!(list[0]["id"], json!(id));

    let editor = client.get(format!("http://{addr}/canvas/{id}")).send().await.unwrap();
    assert_eq!(editor.status().as_u16(), 200);
    let body: Value = editor.json().await.unwrap();
    assert_eq!(body["snapshot"]["background"], json!("#f8fafc"));

    let missing = client.get(format!("http://{addr}/canvas/nope")).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}
