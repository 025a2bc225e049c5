use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// An aggregate that forwards data from one or more devices to the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transmitter {
    pub id: EntityId,
    pub name: String,
    pub owner: EntityId,
    /// Devices whose data this transmitter relays.
    #[serde(default)]
    pub devices: Vec<EntityId>,
}
