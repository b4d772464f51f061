//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! `/` is the canvas directory and `/canvas/{id}` the editor view of one
//! record. Editing happens over a websocket per canvas: the client sends
//! toolbar actions as frames and the server-side session answers. A second
//! websocket streams the live directory. Anything else is a JSON 404.

pub mod canvas;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(canvas::list_canvases))
        .route("/canvas/{id}", get(canvas::get_canvas))
        .route("/api/canvas", post(canvas::create_canvas))
        .route("/api/canvas/feed", get(ws::handle_feed))
        .route("/api/canvas/{id}/session", get(ws::handle_session))
        .route("/api/session", get(ws::handle_scratch_session))
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" })))
}

// =============================================================================
// TEST HELPERS
// =============================================================================
