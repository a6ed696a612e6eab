//! Consumer-facing transport for the habitat telemetry bridge.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) where dashboards send
//!   `register-client` and then receive `hab-info`, `sensor-info`, and
//!   periodic `step-batch` events, and where producers push
//!   `register-sensor`, `sensor-reading`, and `sensor-batch` events, and
//!   where sensor managers receive `refresh-sensors` requests
//! - **REST endpoints** for direct-push producers and read-only queries
//!   (health, habitat info, sensors, per-sensor history)
//!
//! # Architecture
//!
//! Each `WebSocket` connection gets a [`ConsumerId`] and a bounded
//! outbound queue registered with the [`WsTransport`]. The hub and
//! broadcast loop only ever enqueue; the connection task drains its queue
//! onto the socket. A slow or vanished client therefore costs one failed
//! delivery and never stalls the broadcast.
//!
//! [`ConsumerId`]: habitat_types::ConsumerId
//! [`WsTransport`]: transport::WsTransport

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod transport;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerConfig, ServerError};
pub use startup::{StartupError, spawn_observer};
pub use state::AppState;
pub use transport::WsTransport;
