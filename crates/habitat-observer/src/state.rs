//! Shared application state for the observer server.
//!
//! [`AppState`] bundles the sensor hub, the direct-push front door that
//! validates producer payloads, the `WebSocket` transport that owns each
//! consumer's outbound queue, and the shutdown token that ends sessions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use habitat_core::{ConsumerTransport, SensorHub, SensorMetadataMap};
use habitat_ingest::DirectPush;
use habitat_registry::Registry;

use crate::transport::WsTransport;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry plus consumer notification.
    pub hub: Arc<SensorHub>,
    /// Validating entry point for producer registrations and readings.
    pub direct: DirectPush,
    /// Outbound queues of connected `WebSocket` consumers.
    pub transport: Arc<WsTransport>,
    /// Cancelled when the bridge shuts down; open sessions then close.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Assemble state around a hub that delivers through `transport`.
    ///
    /// The hub must have been built with the same transport, otherwise
    /// `WebSocket` consumers never see its events.
    pub fn new(hub: Arc<SensorHub>, transport: Arc<WsTransport>, shutdown: CancellationToken) -> Self {
        Self {
            direct: DirectPush::new(Arc::clone(&hub)),
            hub,
            transport,
            shutdown,
        }
    }

    /// Build a hub over `registry` wired to a fresh [`WsTransport`].
    pub fn with_registry(registry: Registry, shutdown: CancellationToken) -> Self {
        let transport = Arc::new(WsTransport::default());
        let sink: Arc<dyn ConsumerTransport> = transport.clone();
        let hub = Arc::new(SensorHub::new(registry, sink));
        Self::new(hub, transport, shutdown)
    }

    /// Fill empty producer names and descriptions from configured metadata.
    #[must_use]
    pub fn with_sensor_metadata(mut self, metadata: SensorMetadataMap) -> Self {
        self.direct = self.direct.with_metadata(metadata);
        self
    }
}
