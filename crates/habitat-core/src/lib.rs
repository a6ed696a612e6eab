//! Sensor hub, broadcast loop, and configuration for the habitat bridge.
//!
//! This crate owns the runtime heart of the bridge: a [`SensorHub`] that
//! serializes every registry mutation behind one lock and notifies
//! consumers, and the [`BroadcastLoop`] that periodically fans the latest
//! bundle out to every subscribed consumer.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `habitat-config.yaml` into
//!   strongly-typed structs.
//! - [`transport`] -- [`ConsumerTransport`] trait and [`MemoryTransport`].
//! - [`hub`] -- The shared [`SensorHub`].
//! - [`broadcast`] -- The periodic [`BroadcastLoop`].
//! - [`format`] -- One-line human rendering of a reading.
//!
//! [`ConsumerTransport`]: transport::ConsumerTransport
//! [`MemoryTransport`]: transport::MemoryTransport
//! [`SensorHub`]: hub::SensorHub
//! [`BroadcastLoop`]: broadcast::BroadcastLoop

pub mod broadcast;
pub mod config;
pub mod format;
pub mod hub;
pub mod transport;

pub use broadcast::{BroadcastLoop, SkipReason, TickOutcome};
pub use config::{BridgeConfig, ConfigError, SensorMetadata, SensorMetadataMap};
pub use format::format_reading;
pub use hub::{DeliveryReport, SensorHub};
pub use transport::{ConsumerTransport, MemoryTransport, TransportError};
