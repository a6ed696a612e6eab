//! Direct-push ingestion: producers call register and submit themselves.
//!
//! The HTTP and WebSocket transport forwards producer requests here. Every
//! payload is decoded and validated before it touches the hub; a rejected
//! payload returns an [`IngestError`] to the caller and changes nothing.
//! Descriptors that leave their name or description empty pick up the
//! operator's configured [`SensorMetadata`].

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use validator::Validate;

use habitat_core::config::lookup_sensor_metadata;
use habitat_core::{SensorHub, SensorMetadata, SensorMetadataMap, format_reading};
use habitat_types::{ConsumerId, Reading, SensorDescriptor};

use crate::adapter::{Adapter, AdapterHandle};
use crate::error::IngestError;

/// Validating front door for producers that push their own data.
#[derive(Debug, Clone)]
pub struct DirectPush {
    hub: Arc<SensorHub>,
    metadata: Arc<SensorMetadataMap>,
}

impl DirectPush {
    /// Create an adapter feeding `hub`.
    pub fn new(hub: Arc<SensorHub>) -> Self {
        Self {
            hub,
            metadata: Arc::default(),
        }
    }

    /// Use configured display metadata for descriptors that lack their own.
    #[must_use]
    pub fn with_metadata(mut self, metadata: SensorMetadataMap) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// Decode, validate, and upsert a descriptor. Returns its sensor ID.
    pub fn register(&self, payload: Value) -> Result<String, IngestError> {
        self.register_descriptor(decode_descriptor(payload)?)
    }

    /// Like [`DirectPush::register`], recording `owner` as the connection
    /// that registered the sensor.
    pub fn register_owned(&self, payload: Value, owner: ConsumerId) -> Result<String, IngestError> {
        let descriptor = self.prepare(decode_descriptor(payload)?)?;
        let sensor_id = descriptor.sensor_id.clone();
        self.hub.register_owned_producer(descriptor, owner);
        Ok(sensor_id)
    }

    /// Validate and upsert an already-decoded descriptor.
    pub fn register_descriptor(&self, descriptor: SensorDescriptor) -> Result<String, IngestError> {
        let descriptor = self.prepare(descriptor)?;
        let sensor_id = descriptor.sensor_id.clone();
        self.hub.register_producer(descriptor);
        Ok(sensor_id)
    }

    fn prepare(&self, mut descriptor: SensorDescriptor) -> Result<SensorDescriptor, IngestError> {
        descriptor.validate()?;
        if let Some(meta) = self.metadata(&descriptor.sensor_id) {
            meta.fill(&mut descriptor);
        }
        Ok(descriptor)
    }

    /// Configured metadata for a sensor ID, matched without regard to case.
    pub fn metadata(&self, sensor_id: &str) -> Option<&SensorMetadata> {
        lookup_sensor_metadata(&self.metadata, sensor_id)
    }

    /// Decode, validate, and record one reading.
    pub fn submit(&self, sensor_id: &str, payload: Value) -> Result<(), IngestError> {
        let reading = Reading::from_value(payload)?;
        self.trace_reading(sensor_id, &reading);
        if self.hub.record_reading(sensor_id, reading) {
            Ok(())
        } else {
            Err(IngestError::UnknownSensor {
                sensor_id: sensor_id.to_owned(),
            })
        }
    }

    /// Record a batch given as one reading object or an array of them.
    ///
    /// The whole batch is validated first; one bad reading rejects all of
    /// it. Returns the number of readings recorded.
    pub fn submit_batch(&self, sensor_id: &str, payload: Value) -> Result<usize, IngestError> {
        let readings = match payload {
            Value::Array(items) => items
                .into_iter()
                .map(Reading::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            single => vec![Reading::from_value(single)?],
        };
        if !self.hub.has_producer(sensor_id) {
            return Err(IngestError::UnknownSensor {
                sensor_id: sensor_id.to_owned(),
            });
        }
        for reading in &readings {
            self.trace_reading(sensor_id, reading);
        }
        let count = self.hub.record_readings(sensor_id, readings);
        debug!(sensor_id, count, "Reading batch recorded");
        Ok(count)
    }

    /// Remove a producer. Returns `false` if it was not registered.
    pub fn deregister(&self, sensor_id: &str) -> bool {
        self.hub.deregister_producer(sensor_id)
    }

    /// Remove a producer only while `owner` is still the one that
    /// registered it last.
    pub fn deregister_owned(&self, sensor_id: &str, owner: ConsumerId) -> bool {
        self.hub.deregister_owned_producer(sensor_id, owner)
    }

    /// The hub this adapter feeds.
    pub const fn hub(&self) -> &Arc<SensorHub> {
        &self.hub
    }

    fn trace_reading(&self, sensor_id: &str, reading: &Reading) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let descriptor = self.hub.producer(sensor_id);
            trace!(sensor_id, "{}", format_reading(reading, descriptor.as_ref()));
        }
    }
}

impl Adapter for DirectPush {
    fn name(&self) -> &'static str {
        "direct-push"
    }

    /// Direct push is driven by the transport and owns no tasks.
    ///
    /// It always feeds the hub it was built with; `hub` is expected to be
    /// that same hub and a different one is ignored with a warning.
    fn start(&self, hub: Arc<SensorHub>, cancel: &CancellationToken) -> AdapterHandle {
        if !Arc::ptr_eq(&hub, &self.hub) {
            warn!(adapter = self.name(), "Started with a foreign hub; keeping the hub it was built with");
        }
        AdapterHandle::new(self.name(), cancel.child_token(), Vec::new())
    }
}

fn decode_descriptor(payload: Value) -> Result<SensorDescriptor, IngestError> {
    serde_json::from_value(payload).map_err(|e| IngestError::InvalidDescriptor {
        reason: e.to_string(),
    })
}
