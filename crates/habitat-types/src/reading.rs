//! Sensor readings and the periodic broadcast bundle.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Accepted reading timestamp layout. Fractional seconds are optional.
const READING_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Layout of the bundle timestamp.
const BUNDLE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors raised when a reading payload is rejected at ingestion.
#[derive(Debug, thiserror::Error)]
pub enum ReadingError {
    /// Payload was not a JSON object with `n` and `timestamp`.
    #[error("malformed reading: {0}")]
    Json(#[from] serde_json::Error),

    /// `timestamp` did not match `YYYY-MM-DD HH:MM:SS[.ffffff]`.
    #[error("invalid reading timestamp `{value}`: {source}")]
    Timestamp {
        /// The rejected timestamp text.
        value: String,
        /// Underlying parse failure.
        #[source]
        source: chrono::ParseError,
    },

    /// A field value was an object or an array.
    #[error("reading field `{0}` must be a number, string, bool or null")]
    Field(String),
}

/// One sample from one producer.
///
/// Fields other than `n` and `timestamp` are kept verbatim in `fields`
/// and flattened back into the object on serialization, so unknown
/// fields pass through the bridge untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Producer-assigned sequence number.
    pub n: u64,
    /// Producer wall-clock time, `YYYY-MM-DD HH:MM:SS[.ffffff]`.
    pub timestamp: String,
    /// Measured values keyed by schema field name.
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Reading {
    /// Create a reading with no measured values.
    pub fn new(n: u64, timestamp: impl Into<String>) -> Self {
        Self {
            n,
            timestamp: timestamp.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style helper adding one measured value.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_owned(), value.into());
        self
    }

    /// Decode and validate a reading from raw JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ReadingError> {
        let reading: Self = serde_json::from_slice(bytes)?;
        reading.validate()?;
        Ok(reading)
    }

    /// Decode and validate a reading from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ReadingError> {
        let reading: Self = serde_json::from_value(value)?;
        reading.validate()?;
        Ok(reading)
    }

    /// Check the timestamp layout and that every field is a scalar.
    pub fn validate(&self) -> Result<(), ReadingError> {
        NaiveDateTime::parse_from_str(&self.timestamp, READING_TIMESTAMP_FORMAT)
            .map_err(|source| ReadingError::Timestamp {
                value: self.timestamp.clone(),
                source,
            })?;

        if let Some((name, _)) = self
            .fields
            .iter()
            .find(|(_, v)| v.is_object() || v.is_array())
        {
            return Err(ReadingError::Field(name.clone()));
        }
        Ok(())
    }

    /// Numeric value of a field, if present and numeric.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }
}

/// One broadcast unit: the latest reading of every producer with history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Bundle {
    /// Broadcast sequence number, advanced once per emission.
    #[ts(type = "number")]
    pub n: u64,
    /// Local wall-clock time the bundle was built.
    pub timestamp: String,
    /// Latest reading per producer ID.
    #[ts(type = "Record<string, { n: number, timestamp: string } & Record<string, unknown>>")]
    pub readings: BTreeMap<String, Reading>,
}

impl Bundle {
    /// Whether the bundle carries no readings.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Render a bundle timestamp (`YYYY-MM-DD HH:MM:SS`).
pub fn bundle_timestamp(at: DateTime<Local>) -> String {
    at.format(BUNDLE_TIMESTAMP_FORMAT).to_string()
}
