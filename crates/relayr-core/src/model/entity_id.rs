// ── Core identity type ──
//
// Devices, transmitters and owners are all addressed by an EntityId.
// The platform issues UUIDs, but locally provisioned entities and test
// fixtures may use arbitrary strings; consumers never care which.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical identifier for any relayr entity.
///
/// Equality and hashing follow the parsed form, so the same UUID written in
/// upper or lower case identifies the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Opaque(String),
}

impl EntityId {
    /// Mint a fresh random identifier.
    pub fn random() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(u) => Some(u),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Opaque(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Opaque(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_from_uuid_string() {
        let id = EntityId::from("550e8400-e29b-41d4-a716-446655440000");
        assert!(id.as_uuid().is_some());
    }

    #[test]
    fn entity_id_from_opaque_string() {
        let id = EntityId::from("thermometer-kitchen");
        assert_eq!(id, EntityId::Opaque("thermometer-kitchen".into()));
    }

    #[test]
    fn uuid_case_does_not_matter() {
        let lower = EntityId::from("550e8400-e29b-41d4-a716-446655440000");
        let upper = EntityId::from("550E8400-E29B-41D4-A716-446655440000");
        assert_eq!(lower, upper);
    }

    #[test]
    fn entity_id_roundtrips_through_display() {
        let id = EntityId::random();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
