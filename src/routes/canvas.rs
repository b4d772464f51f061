//! Canvas directory and editor routes.

#[cfg(test)]
#[path = "canvas_test.rs"]
mod canvas_test;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::services::gateway::SyncError;
use crate::state::{AppState, CanvasRecord};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Present on the editor view only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
}

/// Directory entry: no snapshot.
pub(crate) fn to_summary(record: &CanvasRecord) -> CanvasResponse {
    CanvasResponse {
        id: record.id.clone(),
        name: record.display_name().to_owned(),
        created_at: record.created_at.map(i64::from),
        snapshot: None,
    }
}

/// Editor view: the summary plus the snapshot, if one is stored.
pub(crate) fn to_detail(record: &CanvasRecord) -> CanvasResponse {
    CanvasResponse { snapshot: record.snapshot().map(Into::into), ..to_summary(record) }
}

/// `GET /`: every canvas, oldest first.
pub async fn list_canvases(State(state): State<AppState>) -> Result<Json<Vec<CanvasResponse>>, StatusCode> {
    let records = state.directory.list_once().await.map_err(sync_error_to_status)?;
    Ok(Json(records.iter().map(to_summary).collect()))
}

/// `POST /api/canvas`: create a blank canvas.
pub async fn create_canvas(State(state): State<AppState>) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let id = state.directory.create_new().await.map_err(sync_error_to_status)?;
    info!(canvas_id = %id, "canvas created via api");
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

/// `GET /canvas/:id`: one canvas with its snapshot.
pub async fn get_canvas(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CanvasResponse>, StatusCode> {
    let record = state
        .directory
        .get(&id)
        .await
        .map_err(sync_error_to_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(to_detail(&record)))
}

pub(crate) fn sync_error_to_status(err: SyncError) -> StatusCode {
    match err {
        SyncError::InvalidCanvasId(_) => StatusCode::NOT_FOUND,
        SyncError::Store(e) => {
            error!(error = %e, "canvas store request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SyncError::SubscriptionClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}
