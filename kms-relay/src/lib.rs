//! kms-relay library - performance relay service
//!
//! Holds one canonical session state per performance and rebroadcasts
//! control intents to every other member of that performance.

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod registry;

pub use registry::SessionRegistry;

/// Application state shared across HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Canonical performance state and fan-out
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    /// Create new application state
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let api = Router::new()
        .route("/api/performances", get(api::list_performances))
        .route("/api/performances/:session_id", get(api::get_performance))
        .route("/performances/:session_id/ws", get(api::performance_socket));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Devices on the local network connect from arbitrary origins
        .layer(CorsLayer::permissive())
}
