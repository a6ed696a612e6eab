//! Static habitat metadata.
//!
//! Fixed at startup from configuration and sent once to every consumer
//! that registers, as the `hab-info` event.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Static information about the habitat the sensors are deployed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HabInfo {
    /// Number of occupants.
    pub humans: u32,
    /// Habitat volume in cubic metres.
    pub volume: u32,
    /// Deployment location name, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Default for HabInfo {
    fn default() -> Self {
        Self {
            humans: 4,
            volume: 272,
            location: None,
        }
    }
}
