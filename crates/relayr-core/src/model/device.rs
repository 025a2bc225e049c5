// ── Device domain types ──

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// Firmware descriptor. Passed through the engine unmodified.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Firmware {
    pub version: String,
    /// Vendor-specific attributes, kept verbatim.
    #[serde(default, flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// The passive attribute record of a device, as returned by the platform.
///
/// The engine only ever mutates `name`, and only after the server has
/// confirmed the change (see [`Device::set_name`](crate::Device::set_name)).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: EntityId,
    pub name: String,
    pub owner: EntityId,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub firmware: Firmware,
    /// MQTT credential for the cloud platform.
    pub secret: SecretString,
    /// Device family, used to pick registered provisioning handlers.
    #[serde(default)]
    pub model: Option<String>,
}

impl DeviceRecord {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, owner: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: owner.into(),
            public: false,
            firmware: Firmware::default(),
            secret: SecretString::from(String::new()),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = SecretString::from(secret.into());
        self
    }

    pub fn with_firmware(mut self, firmware: Firmware) -> Self {
        self.firmware = firmware;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn record_deserializes_from_platform_json() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "name": "Wunderbar thermometer",
            "owner": "owner-7",
            "public": true,
            "firmware": { "version": "1.0.2", "build": 17 },
            "secret": "s3cr3t",
            "model": "wunderbar-htu"
        }))
        .unwrap();

        assert!(record.id.as_uuid().is_some());
        assert!(record.public);
        assert_eq!(record.firmware.version, "1.0.2");
        assert_eq!(record.firmware.properties["build"], json!(17));
        assert_eq!(record.secret.expose_secret(), "s3cr3t");
        assert_eq!(record.model.as_deref(), Some("wunderbar-htu"));
    }

    #[test]
    fn debug_output_hides_secret() {
        let record = DeviceRecord::new("d1", "Sensor", "u1").with_secret("hunter2");
        assert!(!format!("{record:?}").contains("hunter2"));
    }
}
