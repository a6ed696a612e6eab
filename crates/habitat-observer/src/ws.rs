//! `WebSocket` sessions for consumers and direct-push producers.
//!
//! Clients connect to `GET /ws` and exchange text frames of the form
//! `{"event": "<name>", "data": ...}`. A dashboard sends
//! `register-client` and from then on receives `hab-info`, `sensor-info`,
//! and `step-batch` events. A producer sends `register-sensor` with its
//! descriptor, waits for `send-data`, then sends `sensor-reading` or
//! `sensor-batch` frames. A sensor manager sends `register-sensor-manager`
//! and is sent `refresh-sensors` whenever any client asks for one.
//!
//! Outbound events arrive through the connection's [`WsTransport`] queue;
//! the session task is the only writer to the socket. When the socket
//! closes, the consumer is forgotten and every sensor this connection
//! still owns is deregistered. A sensor that has since re-registered over
//! another connection stays.
//!
//! [`WsTransport`]: crate::transport::WsTransport

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use habitat_core::ConsumerTransport;
use habitat_types::{ConsumerId, ServerEvent};

use crate::state::AppState;

/// A decoded client-to-server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Subscribe this connection to broadcasts.
    RegisterClient,
    /// Register (or replace) a producer descriptor.
    RegisterSensor(Value),
    /// One reading from the connection's current sensor.
    SensorReading(Value),
    /// One reading or an array of readings from the current sensor.
    SensorBatch(Value),
    /// Announce this connection as a sensor manager.
    RegisterSensorManager,
    /// Ask every sensor manager, or just the given one, to re-announce.
    RefreshSensors(Option<ConsumerId>),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Decode a text frame. Unknown event names are an error.
    pub fn parse(text: &str) -> Result<Self, String> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| format!("malformed frame: {e}"))?;
        match envelope.event.as_str() {
            "register-client" => Ok(Self::RegisterClient),
            "register-sensor" => Ok(Self::RegisterSensor(envelope.data)),
            "sensor-reading" => Ok(Self::SensorReading(envelope.data)),
            "sensor-batch" => Ok(Self::SensorBatch(envelope.data)),
            "register-sensor-manager" => Ok(Self::RegisterSensorManager),
            "refresh-sensors" => serde_json::from_value(envelope.data)
                .map(Self::RefreshSensors)
                .map_err(|e| format!("invalid sensor manager id: {e}")),
            other => Err(format!("unknown event: {other}")),
        }
    }
}

/// Per-connection bookkeeping.
#[derive(Debug)]
pub struct Session {
    consumer: ConsumerId,
    sensors: BTreeSet<String>,
    current: Option<String>,
}

impl Session {
    /// Start tracking a freshly connected client.
    pub const fn new(consumer: ConsumerId) -> Self {
        Self {
            consumer,
            sensors: BTreeSet::new(),
            current: None,
        }
    }

    /// The connection's consumer identity.
    pub const fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Sensors registered over this connection.
    pub const fn sensors(&self) -> &BTreeSet<String> {
        &self.sensors
    }

    /// Decode and apply one text frame, replying with `error` on rejection.
    pub fn handle_text(&mut self, state: &AppState, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle(state, event),
            Err(reason) => self.reject(state, reason),
        }
    }

    /// Apply one decoded client event.
    pub fn handle(&mut self, state: &AppState, event: ClientEvent) {
        match event {
            ClientEvent::RegisterClient => {
                let report = state.hub.register_consumer(self.consumer);
                info!(
                    consumer = %self.consumer,
                    delivered = report.delivered,
                    "Consumer registered"
                );
            }
            ClientEvent::RegisterSensor(payload) => {
                match state.direct.register_owned(payload, self.consumer) {
                    Ok(sensor_id) => {
                        debug!(consumer = %self.consumer, sensor_id, "Sensor registered over WebSocket");
                        self.sensors.insert(sensor_id.clone());
                        self.current = Some(sensor_id);
                        self.reply(state, &ServerEvent::SendData);
                    }
                    Err(e) => self.reject(state, e.to_string()),
                }
            }
            ClientEvent::SensorReading(payload) => {
                let Some(sensor_id) = self.current.as_deref() else {
                    self.reject(state, "sensor-reading before register-sensor".to_owned());
                    return;
                };
                if let Err(e) = state.direct.submit(sensor_id, payload) {
                    self.reject(state, e.to_string());
                }
            }
            ClientEvent::SensorBatch(payload) => {
                let Some(sensor_id) = self.current.as_deref() else {
                    self.reject(state, "sensor-batch before register-sensor".to_owned());
                    return;
                };
                if let Err(e) = state.direct.submit_batch(sensor_id, payload) {
                    self.reject(state, e.to_string());
                }
            }
            ClientEvent::RegisterSensorManager => {
                state.hub.register_sensor_manager(self.consumer);
            }
            ClientEvent::RefreshSensors(target) => {
                let report = state.hub.refresh_sensors(target);
                debug!(
                    consumer = %self.consumer,
                    managers = report.delivered,
                    "Sensor refresh requested"
                );
            }
        }
    }

    /// Forget the consumer and every sensor it still owns.
    pub fn close(self, state: &AppState) {
        state.hub.deregister_consumer(self.consumer);
        state.transport.detach(self.consumer);
        let removed = self
            .sensors
            .iter()
            .filter(|sensor_id| state.direct.deregister_owned(sensor_id, self.consumer))
            .count();
        debug!(
            consumer = %self.consumer,
            sensors = self.sensors.len(),
            removed,
            "WebSocket session closed"
        );
    }

    fn reject(&self, state: &AppState, reason: String) {
        warn!(consumer = %self.consumer, %reason, "Client frame rejected");
        self.reply(state, &ServerEvent::Error(reason));
    }

    fn reply(&self, state: &AppState, event: &ServerEvent) {
        if let Err(e) = state.transport.emit(self.consumer, event) {
            debug!(event = event.name(), error = %e, "Reply not delivered");
        }
    }
}

/// Upgrade an HTTP request to a `WebSocket` session.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_session(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Drive one connection until the client leaves or the bridge shuts down.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let consumer = ConsumerId::new();
    let mut outbound = state.transport.attach(consumer);
    state.hub.connect_consumer(consumer);
    let mut session = Session::new(consumer);
    debug!(%consumer, "WebSocket client connected");

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                if socket.send(Message::Close(None)).await.is_err() {
                    debug!(%consumer, "Close frame not delivered");
                }
                break;
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(event = event.name(), "Failed to serialize event: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(%consumer, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.handle_text(&state, text.as_str()),
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(%consumer, "WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%consumer, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(%consumer, "WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    session.close(&state);
}

#[cfg(test)]
mod tests {
    use habitat_registry::Registry;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn setup() -> (AppState, Session, mpsc::Receiver<ServerEvent>) {
        let state = AppState::with_registry(Registry::default(), CancellationToken::new());
        let (session, rx) = connect(&state);
        (state, session, rx)
    }

    fn connect(state: &AppState) -> (Session, mpsc::Receiver<ServerEvent>) {
        let consumer = ConsumerId::new();
        let rx = state.transport.attach(consumer);
        state.hub.connect_consumer(consumer);
        (Session::new(consumer), rx)
    }

    fn reading_frame(n: u64) -> String {
        json!({
            "event": "sensor-reading",
            "data": {"n": n, "timestamp": "2024-01-01 00:00:00", "temp": 21.0}
        })
        .to_string()
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn register_frame() -> String {
        json!({
            "event": "register-sensor",
            "data": {
                "sensor_type": "Mock",
                "sensor_id": "mock-1",
                "reading_schema": {"temp": {"label": "Temperature", "unit": "°C"}}
            }
        })
        .to_string()
    }

    #[test]
    fn parse_known_events() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"register-client"}"#),
            Ok(ClientEvent::RegisterClient)
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"sensor-batch","data":[]}"#),
            Ok(ClientEvent::SensorBatch(json!([])))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"refresh-sensors"}"#),
            Ok(ClientEvent::RefreshSensors(None))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"register-sensor-manager","data":null}"#),
            Ok(ClientEvent::RegisterSensorManager)
        );
        assert!(ClientEvent::parse(r#"{"event":"refresh-sensors","data":"manager-7"}"#).is_err());
        assert!(ClientEvent::parse(r#"{"event":"teleport"}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }

    #[test]
    fn register_client_gets_snapshot() {
        let (state, mut session, mut rx) = setup();
        session.handle_text(&state, r#"{"event":"register-client","data":null}"#);

        let names: Vec<_> = drain(&mut rx).iter().map(ServerEvent::name).collect();
        assert_eq!(names, vec!["hab-info", "sensor-info"]);
        assert_eq!(state.hub.consumer_counts(), (1, 1));
    }

    #[test]
    fn producer_session_registers_and_submits() {
        let (state, mut session, mut rx) = setup();
        session.handle_text(&state, &register_frame());
        session.handle_text(
            &state,
            &json!({
                "event": "sensor-reading",
                "data": {"n": 0, "timestamp": "2024-01-01 00:00:00", "temp": 21.0}
            })
            .to_string(),
        );

        assert_eq!(drain(&mut rx), vec![ServerEvent::SendData]);
        assert!(session.sensors().contains("mock-1"));
        assert_eq!(state.hub.history("mock-1").map(|h| h.len()), Some(1));
    }

    #[test]
    fn reading_without_sensor_gets_error_reply() {
        let (state, mut session, mut rx) = setup();
        session.handle_text(
            &state,
            r#"{"event":"sensor-reading","data":{"n":0,"timestamp":"2024-01-01 00:00:00"}}"#,
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events.first(), Some(ServerEvent::Error(_))));
    }

    #[test]
    fn invalid_descriptor_gets_error_reply() {
        let (state, mut session, mut rx) = setup();
        session.handle_text(
            &state,
            r#"{"event":"register-sensor","data":{"sensor_id":"x"}}"#,
        );

        assert!(matches!(drain(&mut rx).first(), Some(ServerEvent::Error(_))));
        assert!(session.sensors().is_empty());
        assert!(state.hub.producers().is_empty());
    }

    #[test]
    fn batch_goes_to_current_sensor() {
        let (state, mut session, _rx) = setup();
        session.handle_text(&state, &register_frame());
        session.handle(
            &state,
            ClientEvent::SensorBatch(json!([
                {"n": 0, "timestamp": "2024-01-01 00:00:00", "temp": 20.0},
                {"n": 1, "timestamp": "2024-01-01 00:00:01", "temp": 20.5}
            ])),
        );
        assert_eq!(state.hub.history("mock-1").map(|h| h.len()), Some(2));
    }

    #[test]
    fn close_removes_consumer_and_its_sensors() {
        let (state, mut session, _rx) = setup();
        session.handle_text(&state, r#"{"event":"register-client"}"#);
        session.handle_text(&state, &register_frame());
        assert!(state.hub.has_producer("mock-1"));

        let consumer = session.consumer();
        session.close(&state);

        assert!(!state.hub.has_producer("mock-1"));
        assert_eq!(state.hub.consumer_counts(), (0, 0));
        assert_eq!(state.transport.attached(), 0);
        assert!(state.transport.emit(consumer, &ServerEvent::Error(String::new())).is_err());
    }

    #[test]
    fn closing_stale_connection_keeps_reregistered_sensor() {
        let (state, mut first, _first_rx) = setup();
        let (mut second, mut second_rx) = connect(&state);
        first.handle_text(&state, &register_frame());
        second.handle_text(&state, &register_frame());
        drain(&mut second_rx);

        first.close(&state);

        assert!(state.hub.has_producer("mock-1"));
        assert_eq!(state.hub.producer_owner("mock-1"), Some(second.consumer()));
        second.handle_text(&state, &reading_frame(0));
        assert!(drain(&mut second_rx).is_empty());
        assert_eq!(state.hub.history("mock-1").map(|h| h.len()), Some(1));

        second.close(&state);
        assert!(!state.hub.has_producer("mock-1"));
    }

    #[test]
    fn refresh_is_forwarded_to_sensor_managers() {
        let (state, mut dashboard, mut dashboard_rx) = setup();
        let (mut manager, mut manager_rx) = connect(&state);
        let (mut other, mut other_rx) = connect(&state);
        manager.handle_text(&state, r#"{"event":"register-sensor-manager"}"#);
        other.handle_text(&state, r#"{"event":"register-sensor-manager"}"#);

        dashboard.handle_text(&state, r#"{"event":"refresh-sensors"}"#);
        assert_eq!(drain(&mut manager_rx), vec![ServerEvent::RefreshSensors]);
        assert_eq!(drain(&mut other_rx), vec![ServerEvent::RefreshSensors]);
        assert!(drain(&mut dashboard_rx).is_empty());

        let frame = json!({"event": "refresh-sensors", "data": manager.consumer()}).to_string();
        dashboard.handle_text(&state, &frame);
        assert_eq!(drain(&mut manager_rx), vec![ServerEvent::RefreshSensors]);
        assert!(drain(&mut other_rx).is_empty());

        manager.close(&state);
        dashboard.handle_text(&state, r#"{"event":"refresh-sensors"}"#);
        assert_eq!(drain(&mut other_rx), vec![ServerEvent::RefreshSensors]);
    }
}
