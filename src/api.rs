//! HTTP admin API: store snapshot export/import and a room overview.
//!
//! These routes sit behind the admin auth middleware; nothing here is meant
//! for game clients, which speak the WebSocket protocol instead.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::protocol::RoomSummary;
use crate::state::{AppState, StoreSnapshot};

/// Export the durable store as JSON.
///
/// GET /api/export
pub async fn export_state(State(state): State<AppState>) -> Json<StoreSnapshot> {
    Json(state.store.snapshot().await)
}

/// Import a store snapshot, replacing all current state.
///
/// POST /api/import
///
/// Every live room runtime is rebuilt; armed timers do not survive.
pub async fn import_state(
    State(state): State<AppState>,
    Json(snapshot): Json<StoreSnapshot>,
) -> Response {
    match state.import_snapshot(snapshot).await {
        Ok(rooms) => {
            tracing::info!(rooms, "Store snapshot imported");
            (StatusCode::OK, format!("imported {} rooms", rooms)).into_response()
        }
        Err(e) => {
            tracing::error!("Snapshot import failed: {}", e);
            (StatusCode::BAD_REQUEST, format!("import failed: {}", e)).into_response()
        }
    }
}

/// Room overview for the admin.
///
/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.list_rooms().await)
}
