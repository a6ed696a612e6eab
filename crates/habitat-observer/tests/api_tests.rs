//! Integration tests for the observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. This validates handler logic and routing
//! without needing a live network connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use habitat_core::{BroadcastLoop, TickOutcome};
use habitat_observer::router::build_router;
use habitat_observer::server::ServerConfig;
use habitat_observer::startup::spawn_observer;
use habitat_observer::state::AppState;
use habitat_registry::Registry;
use habitat_types::{ConsumerId, HabInfo, ServerEvent};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn make_state() -> Arc<AppState> {
    let hab = HabInfo {
        humans: 2,
        volume: 100,
        location: Some(String::from("sam")),
    };
    Arc::new(AppState::with_registry(
        Registry::new(hab, 3),
        CancellationToken::new(),
    ))
}

fn descriptor() -> Value {
    json!({
        "sensor_type": "SCD30",
        "sensor_name": "Lab CO2",
        "sensor_id": "pi1.scd30",
        "reading_info": {
            "co2": {"label": "CO2", "unit": "ppm"},
            "temp": {"label": "Temperature", "unit": "°C"}
        }
    })
}

fn reading(n: u64) -> Value {
    json!({"n": n, "timestamp": format!("2024-05-01 10:00:{n:02}.000000"), "co2": 410, "temp": 21.5})
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =========================================================================
// Read endpoints
// =========================================================================

#[tokio::test]
async fn health_reports_counts() {
    let state = make_state();
    state.hub.connect_consumer(ConsumerId::new());
    let app = build_router(state);

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["producers"], 0);
    assert_eq!(json["consumers"], 1);
    assert_eq!(json["subscribers"], 0);
}

#[tokio::test]
async fn hab_info_is_served() {
    let app = build_router(make_state());

    let response = app
        .oneshot(Request::get("/api/hab-info").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, json!({"humans": 2, "volume": 100, "location": "sam"}));
}

#[tokio::test]
async fn history_of_unknown_sensor_is_404() {
    let app = build_router(make_state());

    let response = app
        .oneshot(
            Request::get("/api/sensors/ghost/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["status"], 404);
    assert!(json["error"].as_str().unwrap().contains("ghost"));
}

// =========================================================================
// Direct push
// =========================================================================

#[tokio::test]
async fn register_then_list_sensors() {
    let state = make_state();

    let response = build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors", &descriptor()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await, json!({"sensor_id": "pi1.scd30"}));

    let response = build_router(state)
        .oneshot(Request::get("/api/sensors").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["sensors"]["pi1.scd30"]["sensor_type"], "SCD30");
    assert_eq!(
        json["sensors"]["pi1.scd30"]["reading_schema"]["co2"]["unit"],
        "ppm"
    );
}

#[tokio::test]
async fn invalid_descriptor_is_400() {
    let app = build_router(make_state());

    let response = app
        .oneshot(post_json("/api/sensors", &json!({"sensor_id": "x"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], 400);
}

#[tokio::test]
async fn readings_are_recorded_and_capped() {
    let state = make_state();
    build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors", &descriptor()))
        .await
        .unwrap();

    let batch = json!([reading(0), reading(1), reading(2), reading(3)]);
    let response = build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors/pi1.scd30/readings", &batch))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await, json!({"recorded": 4}));

    let response = build_router(state)
        .oneshot(
            Request::get("/api/sensors/pi1.scd30/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["count"], 3);
    assert_eq!(json["readings"][0]["n"], 1);
    assert_eq!(json["readings"][2]["n"], 3);
}

#[tokio::test]
async fn reading_for_unknown_sensor_is_404() {
    let app = build_router(make_state());

    let response = app
        .oneshot(post_json("/api/sensors/ghost/readings", &reading(0)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_reading_is_400() {
    let state = make_state();
    build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors", &descriptor()))
        .await
        .unwrap();

    let response = build_router(Arc::clone(&state))
        .oneshot(post_json(
            "/api/sensors/pi1.scd30/readings",
            &json!({"n": 0, "timestamp": "not a time"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.hub.history("pi1.scd30").map(|h| h.len()), Some(0));
}

#[tokio::test]
async fn delete_sensor_then_404() {
    let state = make_state();
    build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors", &descriptor()))
        .await
        .unwrap();

    let delete = || {
        Request::delete("/api/sensors/pi1.scd30")
            .body(Body::empty())
            .unwrap()
    };

    let response = build_router(Arc::clone(&state))
        .oneshot(delete())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = build_router(state).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =========================================================================
// Fan-out through the WebSocket transport
// =========================================================================

#[tokio::test]
async fn pushed_readings_reach_subscribed_consumer() {
    let state = make_state();
    let consumer = ConsumerId::new();
    let mut outbound = state.transport.attach(consumer);
    state.hub.register_consumer(consumer);

    build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors", &descriptor()))
        .await
        .unwrap();
    build_router(Arc::clone(&state))
        .oneshot(post_json("/api/sensors/pi1.scd30/readings", &reading(7)))
        .await
        .unwrap();

    let mut broadcast = BroadcastLoop::new(Arc::clone(&state.hub), Duration::from_secs(1));
    let outcome = broadcast.tick();
    assert!(matches!(
        outcome,
        TickOutcome::Emitted {
            n: 0,
            delivered: 1,
            failed: 0
        }
    ));

    let mut names = Vec::new();
    let mut last = None;
    while let Ok(event) = outbound.try_recv() {
        names.push(event.name());
        last = Some(event);
    }
    assert_eq!(
        names,
        vec!["hab-info", "sensor-info", "sensor-info", "step-batch"]
    );
    let bundles = match last {
        Some(ServerEvent::StepBatch(bundles)) => bundles,
        _ => Vec::new(),
    };
    assert_eq!(bundles.len(), 1);
    let reading_n = bundles
        .first()
        .and_then(|b| b.readings.get("pi1.scd30"))
        .map(|r| r.n);
    assert_eq!(reading_n, Some(7));
}

// =========================================================================
// Server lifecycle
// =========================================================================

#[tokio::test]
async fn spawned_server_stops_on_shutdown() {
    let state = make_state();
    let shutdown = state.shutdown.clone();
    let config = ServerConfig {
        host: String::from("127.0.0.1"),
        port: 0,
    };

    let handle = spawn_observer(&config, state).await.unwrap();
    shutdown.cancel();

    let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(joined, Ok(Ok(()))));
}

#[tokio::test]
async fn invalid_bind_address_is_reported() {
    let config = ServerConfig {
        host: String::from("not an address"),
        port: 8081,
    };
    assert!(spawn_observer(&config, make_state()).await.is_err());
}
