//! Named events pushed from the bridge to consumers.
//!
//! On the wire every event is a JSON object `{"event": "<name>", "data": ...}`.
//! Events without a payload omit `data`.

use serde::{Deserialize, Serialize};

use crate::habitat::HabInfo;
use crate::reading::Bundle;
use crate::sensor::ProducerMap;

/// A server-to-consumer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full current producer map.
    SensorInfo(ProducerMap),
    /// Static habitat metadata.
    HabInfo(HabInfo),
    /// Exactly one bundle per emission, wrapped in an array.
    StepBatch(Vec<Bundle>),
    /// A rejected request from this connection.
    Error(String),
    /// Tells a producer its registration was accepted and readings may follow.
    SendData,
    /// Asks a sensor manager to re-announce the sensors it runs.
    RefreshSensors,
}

impl ServerEvent {
    /// Wrap one bundle as a `step-batch` event.
    pub fn step(bundle: Bundle) -> Self {
        Self::StepBatch(vec![bundle])
    }

    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SensorInfo(_) => "sensor-info",
            Self::HabInfo(_) => "hab-info",
            Self::StepBatch(_) => "step-batch",
            Self::Error(_) => "error",
            Self::SendData => "send-data",
            Self::RefreshSensors => "refresh-sensors",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::reading::Reading;

    #[test]
    fn hab_info_envelope() {
        let event = ServerEvent::HabInfo(HabInfo::default());
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value, json!({"event": "hab-info", "data": {"humans": 4, "volume": 272}}));
        assert_eq!(event.name(), "hab-info");
    }

    #[test]
    fn step_batch_wraps_one_bundle() {
        let mut readings = BTreeMap::new();
        readings.insert(
            "host1.bme688".to_owned(),
            Reading::new(0, "2024-01-01 00:00:00.000000").with_field("temp", 21.5),
        );
        let event = ServerEvent::step(Bundle {
            n: 7,
            timestamp: "2024-01-01 00:00:01".to_owned(),
            readings,
        });
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value["event"], "step-batch");
        assert_eq!(value["data"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["data"][0]["n"], 7);
        assert_eq!(value["data"][0]["readings"]["host1.bme688"]["temp"], 21.5);
    }

    #[test]
    fn payload_free_events_carry_only_the_name() {
        let value = serde_json::to_value(ServerEvent::SendData).unwrap_or_default();
        assert_eq!(value, json!({"event": "send-data"}));
        let value = serde_json::to_value(ServerEvent::RefreshSensors).unwrap_or_default();
        assert_eq!(value, json!({"event": "refresh-sensors"}));
        assert_eq!(ServerEvent::RefreshSensors.name(), "refresh-sensors");
    }

    #[test]
    fn sensor_info_roundtrips() {
        let mut producers = ProducerMap::new();
        let desc = crate::sensor::SensorDescriptor::synthesized("host1", "scd30");
        producers.insert(desc.sensor_id.clone(), desc);
        let event = ServerEvent::SensorInfo(producers);
        let text = serde_json::to_string(&event).unwrap_or_default();
        let back: Result<ServerEvent, _> = serde_json::from_str(&text);
        assert_eq!(back.ok(), Some(event));
    }
}
