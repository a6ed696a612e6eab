//! Error types for ingestion.

use habitat_types::ReadingError;

/// Why a producer payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The descriptor is missing required keys or fails validation.
    #[error("invalid sensor descriptor: {reason}")]
    InvalidDescriptor {
        /// Human-readable description of the problem.
        reason: String,
    },

    /// The reading is malformed.
    #[error("invalid reading: {source}")]
    InvalidReading {
        /// The underlying decode or validation error.
        #[from]
        source: ReadingError,
    },

    /// Readings were submitted for a sensor that is not registered.
    #[error("unknown sensor `{sensor_id}`")]
    UnknownSensor {
        /// The unregistered sensor ID.
        sensor_id: String,
    },

    /// A log file could not be read.
    #[error("log file I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl From<validator::ValidationErrors> for IngestError {
    fn from(source: validator::ValidationErrors) -> Self {
        Self::InvalidDescriptor {
            reason: source.to_string(),
        }
    }
}
