//! Type-safe identifier wrapper around [`Uuid`].
//!
//! Consumers are identified by an opaque, transport-level ID that is
//! stable for the lifetime of one connection. IDs use UUID v7
//! (time-ordered) so log lines sort by connection age.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Unique identifier for a consumer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConsumerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
