// ── Wire-level value types ──
//
// Shapes exchanged with a `Connection`. They carry JSON values untouched;
// the engine attaches device identity and arrival time on top.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single measurement as produced by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// What the value measures, e.g. `"temperature"` or `"luminosity"`.
    pub meaning: String,

    /// Sub-component of the device that produced it, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// The measurement itself.
    pub value: serde_json::Value,

    /// Timestamp set by the source, when the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl RawReading {
    pub fn new(meaning: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            meaning: meaning.into(),
            path: None,
            value,
            recorded_at: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Link-level state changes reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectivityEvent {
    Connected,
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    Reconnecting {
        attempt: u32,
    },
}

/// One element of a connection's item stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionItem {
    Reading(RawReading),
    Connectivity(ConnectivityEvent),
    /// A transport fault surfaced while streaming. The stream may keep
    /// producing items afterwards.
    Error(Error),
}

/// An outbound command, already validated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    /// Target path on the device. Absent means the collaborator's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// The command identifier: a JSON string or number.
    pub command: serde_json::Value,

    /// The command argument.
    pub value: serde_json::Value,
}
