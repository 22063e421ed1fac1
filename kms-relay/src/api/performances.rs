//! Read-only performance inspection endpoints
//!
//! Operators use these to see what the relay believes the canonical state
//! is; all mutation goes through the WebSocket protocol.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::registry::PerformanceSummary;
use crate::AppState;

/// GET /api/performances
pub async fn list_performances(State(state): State<AppState>) -> Json<Vec<PerformanceSummary>> {
    Json(state.registry.list().await)
}

/// GET /api/performances/:session_id
pub async fn get_performance(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.registry.snapshot(&session_id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("performance {} not found", session_id) })),
        )
            .into_response(),
    }
}
