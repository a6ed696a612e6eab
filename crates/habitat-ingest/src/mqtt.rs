//! MQTT ingestion: one broker connection, topic-routed to producers.
//!
//! Topics have the shape `<location>/<hostname>/<sensor_type>`. The first
//! message on a topic registers a producer `<hostname>.<sensor_type>` with
//! a descriptor synthesized from the known sensor type table; every
//! message payload is decoded as a reading and recorded.
//!
//! # Connection state machine
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed
//!      ^              |             |
//!      +--- delay ----+-------------+   (any connection error)
//! ```
//!
//! Only cancellation ends the loop.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use habitat_core::config::MqttConfig;
use habitat_core::{SensorHub, format_reading};
use habitat_types::{Reading, SensorDescriptor, SensorType, sensor_id_for};

use crate::adapter::{Adapter, AdapterHandle};
use crate::error::IngestError;

/// Capacity of the rumqttc request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Shortest keep-alive the client accepts.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// How long a cancelled session keeps polling to flush its DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Where the subscriber is in its connection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; waiting to (re)connect.
    Disconnected,
    /// Connecting or waiting for the subscription to be acknowledged.
    Connecting,
    /// Subscribed and receiving messages.
    Subscribed,
}

/// Connection settings for the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Subscription filter.
    pub topic: String,
    /// Client ID prefix; a random suffix is appended per connection.
    pub client_id_prefix: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Delay between a failure and the next connection attempt.
    pub reconnect_delay: Duration,
}

impl MqttSettings {
    /// Build settings from config for a deployment `location`.
    pub fn from_config(config: &MqttConfig, location: &str) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            topic: config.effective_topic(location),
            client_id_prefix: config.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    fn options(&self) -> MqttOptions {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let client_id = format!("{}-{suffix}", self.client_id_prefix);
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive.max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        options
    }
}

/// The three parts of a sensor topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    /// Deployment location.
    pub location: String,
    /// Host the sensor is attached to.
    pub host: String,
    /// Sensor type name as published.
    pub sensor_type: String,
}

impl TopicAddress {
    /// Stable producer ID, `<host>.<sensor_type>`.
    pub fn sensor_id(&self) -> String {
        sensor_id_for(&self.host, &self.sensor_type)
    }
}

/// Split `<location>/<hostname>/<sensor_type>`. Any other shape is `None`.
pub fn parse_topic(topic: &str) -> Option<TopicAddress> {
    let mut parts = topic.split('/');
    let (Some(location), Some(host), Some(sensor_type), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    if location.is_empty() || host.is_empty() || sensor_type.is_empty() {
        return None;
    }
    Some(TopicAddress {
        location: location.to_owned(),
        host: host.to_owned(),
        sensor_type: sensor_type.to_owned(),
    })
}

/// Route one published message into the hub.
///
/// Registers the producer on first sight, then records the reading.
/// Returns the producer ID.
pub fn handle_message(hub: &SensorHub, topic: &str, payload: &[u8]) -> Result<String, IngestError> {
    let address = parse_topic(topic).ok_or_else(|| IngestError::InvalidDescriptor {
        reason: format!("topic `{topic}` is not <location>/<host>/<sensor_type>"),
    })?;
    let reading = Reading::from_json(payload)?;
    let sensor_id = address.sensor_id();

    if !hub.has_producer(&sensor_id) {
        let descriptor = SensorDescriptor::synthesized(&address.host, &address.sensor_type);
        if SensorType::from_name(&address.sensor_type).is_none() {
            warn!(sensor_id = %sensor_id, "Unknown sensor type, registering with empty schema");
        }
        hub.ensure_producer(descriptor);
    }

    if tracing::enabled!(tracing::Level::TRACE) {
        let descriptor = hub.producer(&sensor_id);
        trace!(sensor_id = %sensor_id, "{}", format_reading(&reading, descriptor.as_ref()));
    }
    hub.record_reading(&sensor_id, reading);
    Ok(sensor_id)
}

/// How one connection session ended.
enum SessionEnd {
    Cancelled { connected: bool },
    Failed(String),
}

/// MQTT subscriber adapter.
#[derive(Debug)]
pub struct MqttSubscriber {
    settings: MqttSettings,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl MqttSubscriber {
    /// Create a subscriber; nothing connects until [`Adapter::start`].
    pub fn new(settings: MqttSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            state: Arc::new(state),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connection settings.
    pub const fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    async fn run(
        settings: MqttSettings,
        hub: Arc<SensorHub>,
        state: Arc<watch::Sender<ConnectionState>>,
        cancel: CancellationToken,
    ) {
        info!(host = %settings.host, port = settings.port, topic = %settings.topic, "MQTT subscriber started");
        loop {
            state.send_replace(ConnectionState::Connecting);
            let (client, mut eventloop) = AsyncClient::new(settings.options(), REQUEST_CHANNEL_CAPACITY);
            let end = Self::session(&settings, &hub, &state, &client, &mut eventloop, &cancel).await;

            match end {
                SessionEnd::Cancelled { connected } => {
                    if connected {
                        Self::disconnect(&client, &mut eventloop).await;
                    }
                    state.send_replace(ConnectionState::Disconnected);
                    break;
                }
                SessionEnd::Failed(reason) => {
                    state.send_replace(ConnectionState::Disconnected);
                    warn!(
                        error = %reason,
                        retry_in = ?settings.reconnect_delay,
                        "MQTT connection lost"
                    );
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(settings.reconnect_delay) => {}
            }
        }
        info!("MQTT subscriber stopped");
    }

    async fn session(
        settings: &MqttSettings,
        hub: &SensorHub,
        state: &watch::Sender<ConnectionState>,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut connected = false;
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return SessionEnd::Cancelled { connected },
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected = true;
                    info!(host = %settings.host, port = settings.port, "MQTT connected");
                    if let Err(e) = client.subscribe(settings.topic.as_str(), QoS::AtMostOnce).await {
                        return SessionEnd::Failed(format!("subscribe request failed: {e}"));
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return SessionEnd::Failed(format!("broker refused `{}`", settings.topic));
                    }
                    state.send_replace(ConnectionState::Subscribed);
                    info!(topic = %settings.topic, "MQTT subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Err(e) = handle_message(hub, &publish.topic, &publish.payload) {
                        warn!(topic = %publish.topic, error = %e, "MQTT message dropped");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return SessionEnd::Failed("broker sent disconnect".to_owned());
                }
                Ok(other) => {
                    debug!(event = ?other, "MQTT event");
                }
                Err(e) => return SessionEnd::Failed(e.to_string()),
            }
        }
    }

    /// Queue a DISCONNECT and drive the event loop until it is written.
    ///
    /// Requests only reach the socket while the event loop is polled, so
    /// the loop is polled here, bounded by [`DISCONNECT_GRACE`].
    async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect not queued");
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "MQTT connection closed before disconnect");
                        return false;
                    }
                }
            }
        })
        .await;
        match flushed {
            Ok(true) => info!("MQTT disconnected"),
            Ok(false) => {}
            Err(_) => debug!(grace = ?DISCONNECT_GRACE, "MQTT disconnect not flushed in time"),
        }
    }
}

impl Adapter for MqttSubscriber {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn start(&self, hub: Arc<SensorHub>, cancel: &CancellationToken) -> AdapterHandle {
        let token = cancel.child_token();
        let task = tokio::spawn(Self::run(
            self.settings.clone(),
            hub,
            Arc::clone(&self.state),
            token.clone(),
        ));
        AdapterHandle::new(self.name(), token, vec![task])
    }
}
