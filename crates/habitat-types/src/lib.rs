//! Shared type definitions for the habitat telemetry bridge.
//!
//! This crate is the single source of truth for the vocabulary exchanged
//! between sensors (producers), the bridge, and dashboards (consumers).
//! Types consumed by the dashboard flow to `TypeScript` via `ts-rs`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for consumer connections
//! - [`sensor`] -- Sensor descriptors, reading schemas, and the closed
//!   table of known sensor types
//! - [`reading`] -- Individual readings and the broadcast [`Bundle`]
//! - [`habitat`] -- Static habitat metadata sent to every new consumer
//! - [`event`] -- Named server-to-consumer events
//!
//! [`Bundle`]: reading::Bundle

pub mod event;
pub mod habitat;
pub mod ids;
pub mod reading;
pub mod sensor;

// Re-export all public types at crate root for convenience.
pub use event::ServerEvent;
pub use habitat::HabInfo;
pub use ids::ConsumerId;
pub use reading::{Bundle, Reading, ReadingError, bundle_timestamp};
pub use sensor::{FieldInfo, ProducerMap, ReadingSchema, SensorDescriptor, SensorType, sensor_id_for};
