//! Observer HTTP server lifecycle management.
//!
//! [`bind`] opens the TCP listener so address errors surface at startup;
//! [`serve`] runs the Axum router on it until the state's shutdown token
//! is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use habitat_core::config::ObserverConfig;

use crate::router::build_router;
use crate::state::AppState;

/// Configuration for the observer server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// The TCP port to listen on.
    pub port: u16,
}

impl From<&ObserverConfig> for ServerConfig {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

impl ServerConfig {
    /// Parse the configured host and port into a socket address.
    pub fn addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))
    }
}

/// Bind the listening socket for `config`.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = config.addr()?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Serve the router on an already-bound listener until shutdown.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let shutdown = state.shutdown.clone();
    let router = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Observer server listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    info!("Observer server stopped");
    Ok(())
}

/// Errors that can occur when starting or running the observer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
