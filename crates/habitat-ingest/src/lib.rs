//! Ingestion adapters for the habitat telemetry bridge.
//!
//! Every adapter feeds the shared [`SensorHub`] and implements the same
//! [`Adapter`] capability, so the hub and the broadcast loop never know
//! where a reading came from.
//!
//! # Modules
//!
//! - [`adapter`] -- The [`Adapter`] trait and the [`AdapterHandle`] used
//!   to stop a running adapter.
//! - [`direct`] -- [`DirectPush`]: validated register/submit calls made by
//!   producers over the HTTP and WebSocket transport.
//! - [`mqtt`] -- [`MqttSubscriber`]: one broker connection with a
//!   reconnect loop, topic-routed to synthesized producers.
//! - [`logtail`] -- [`LogTail`]: one task per configured sensor following
//!   a growing JSONL file.
//! - [`error`] -- [`IngestError`].
//!
//! [`SensorHub`]: habitat_core::SensorHub
//! [`Adapter`]: adapter::Adapter
//! [`AdapterHandle`]: adapter::AdapterHandle
//! [`DirectPush`]: direct::DirectPush
//! [`MqttSubscriber`]: mqtt::MqttSubscriber
//! [`LogTail`]: logtail::LogTail
//! [`IngestError`]: error::IngestError

pub mod adapter;
pub mod direct;
pub mod error;
pub mod logtail;
pub mod mqtt;

pub use adapter::{Adapter, AdapterHandle};
pub use direct::DirectPush;
pub use error::IngestError;
pub use logtail::{JsonlTail, LogTail, log_path};
pub use mqtt::{ConnectionState, MqttSettings, MqttSubscriber, TopicAddress, parse_topic};
