use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relayr_api::RawReading;

use super::entity_id::EntityId;

/// A single measurement event, attributed to the device that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: EntityId,
    pub meaning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub value: serde_json::Value,
    /// When the engine received it. Source timestamps take precedence.
    pub received_at: DateTime<Utc>,
}

impl Reading {
    pub(crate) fn from_raw(device_id: EntityId, raw: RawReading) -> Self {
        Self {
            device_id,
            meaning: raw.meaning,
            path: raw.path,
            value: raw.value,
            received_at: raw.recorded_at.unwrap_or_else(Utc::now),
        }
    }
}
