//! Observer server startup helper for embedding in the bridge binary.
//!
//! Provides [`spawn_observer`] which binds the listening socket and then
//! serves the HTTP + `WebSocket` API on a background Tokio task, so the
//! API runs concurrently with the broadcast loop and the adapters.
//!
//! # Usage
//!
//! ```rust,ignore
//! use habitat_observer::{AppState, ServerConfig, spawn_observer};
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::with_registry(registry, shutdown.clone()));
//! let handle = spawn_observer(&ServerConfig::from(&config.observer), state).await?;
//! // Cancelling `shutdown` stops the server; await the handle afterwards.
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError, bind, serve};
use crate::state::AppState;

/// Errors that can occur when spawning the observer server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the observer HTTP server on a background Tokio task.
///
/// The socket is bound before this returns, so an occupied port or a bad
/// address is reported to the caller instead of inside the task. The
/// server stops when `state.shutdown` is cancelled.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the server cannot bind to the
/// requested address.
pub async fn spawn_observer(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<JoinHandle<()>, StartupError> {
    let listener = bind(config).await?;
    let port = listener.local_addr().map_or(config.port, |addr| addr.port());

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, state).await {
            tracing::error!(error = %e, "Observer server exited with error");
        }
    });

    tracing::info!(port, "Observer server spawned on background task");

    Ok(handle)
}
