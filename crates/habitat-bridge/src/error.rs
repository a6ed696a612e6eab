//! Error types for the bridge binary.
//!
//! [`BridgeError`] is the top-level error type that wraps all possible
//! failure modes during bridge startup and shutdown.

/// Top-level error for the bridge binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: habitat_core::ConfigError,
    },

    /// Observer API server failed to start.
    #[error("observer error: {source}")]
    Observer {
        /// The underlying startup error.
        #[from]
        source: habitat_observer::StartupError,
    },

    /// The logging subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
