//! Producer and consumer bookkeeping for the habitat telemetry bridge.
//!
//! The [`Registry`] is plain synchronous state with no I/O: it records
//! which sensors are known, keeps a short [`HistoryRing`] of readings per
//! sensor, tracks connected and subscribed consumers, and assembles the
//! periodic [`Bundle`]. Concurrency and notification live one layer up.
//!
//! # Modules
//!
//! - [`ring`] -- Fixed-capacity, oldest-evicted-first reading buffer.
//! - [`registry`] -- The registry itself and the consumer [`Snapshot`].
//!
//! [`Bundle`]: habitat_types::Bundle
//! [`Snapshot`]: registry::Snapshot

pub mod registry;
pub mod ring;

pub use registry::{DEFAULT_HISTORY_CAPACITY, Registry, Snapshot};
pub use ring::HistoryRing;
