//! REST API endpoint handlers for the observer server.
//!
//! Read endpoints serve point-in-time copies taken from the [`SensorHub`];
//! write endpoints go through [`DirectPush`] so every payload is validated
//! before it reaches the registry.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/health` | Liveness plus producer/consumer counts |
//! | `GET` | `/api/hab-info` | Static habitat metadata |
//! | `GET` | `/api/sensors` | Current producer map |
//! | `GET` | `/api/sensors/{id}/history` | Recent readings, oldest first |
//! | `POST` | `/api/sensors` | Register or replace a producer |
//! | `POST` | `/api/sensors/{id}/readings` | Submit one reading or an array |
//! | `DELETE` | `/api/sensors/{id}` | Deregister a producer |
//!
//! [`SensorHub`]: habitat_core::SensorHub
//! [`DirectPush`]: habitat_ingest::DirectPush

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

/// Report liveness with registry counts.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let producers = state.hub.with_registry(habitat_registry::Registry::producer_count);
    let (consumers, subscribers) = state.hub.consumer_counts();
    Json(json!({
        "status": "ok",
        "producers": producers,
        "consumers": consumers,
        "subscribers": subscribers,
    }))
}

/// Return the static habitat metadata.
pub async fn hab_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.hab_info())
}

/// List every registered producer keyed by sensor ID.
pub async fn list_sensors(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let producers = state.hub.producers();
    Ok(Json(json!({
        "count": producers.len(),
        "sensors": serde_json::to_value(&producers)?,
    })))
}

/// Return one producer's retained readings, oldest first.
pub async fn sensor_history(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let history = state
        .hub
        .history(&sensor_id)
        .ok_or_else(|| ObserverError::NotFound(format!("sensor {sensor_id}")))?;
    Ok(Json(json!({
        "sensor_id": sensor_id,
        "count": history.len(),
        "readings": serde_json::to_value(&history)?,
    })))
}

// ---------------------------------------------------------------------------
// Direct push
// ---------------------------------------------------------------------------

/// Register or replace a producer from its descriptor.
pub async fn register_sensor(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ObserverError> {
    let sensor_id = state.direct.register(payload)?;
    Ok((StatusCode::CREATED, Json(json!({ "sensor_id": sensor_id }))))
}

/// Record one reading, or an array of readings, for a registered producer.
pub async fn submit_readings(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ObserverError> {
    let recorded = state.direct.submit_batch(&sensor_id, payload)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "recorded": recorded }))))
}

/// Deregister a producer.
pub async fn deregister_sensor(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
) -> Result<StatusCode, ObserverError> {
    if state.direct.deregister(&sensor_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ObserverError::NotFound(format!("sensor {sensor_id}")))
    }
}
