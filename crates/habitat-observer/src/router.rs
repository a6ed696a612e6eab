//! Axum router construction for the observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the observer server.
///
/// The router includes:
/// - `GET /ws` -- `WebSocket` consumer and producer sessions
/// - `GET /api/health` -- liveness and counts
/// - `GET /api/hab-info` -- habitat metadata
/// - `GET|POST /api/sensors` -- list or register producers
/// - `DELETE /api/sensors/{id}` -- deregister a producer
/// - `GET /api/sensors/{id}/history` -- retained readings
/// - `POST /api/sensors/{id}/readings` -- submit readings
///
/// CORS allows any origin so dashboards can be served from elsewhere.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_session))
        // REST API
        .route("/api/health", get(handlers::health))
        .route("/api/hab-info", get(handlers::hab_info))
        .route(
            "/api/sensors",
            get(handlers::list_sensors).post(handlers::register_sensor),
        )
        .route("/api/sensors/{id}", delete(handlers::deregister_sensor))
        .route("/api/sensors/{id}/history", get(handlers::sensor_history))
        .route("/api/sensors/{id}/readings", post(handlers::submit_readings))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
