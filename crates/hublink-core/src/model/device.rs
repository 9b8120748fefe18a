// ── Connector / device / channel domain types ──

use serde::{Deserialize, Serialize};

use super::entity_id::{ChannelId, ConnectorId, DeviceId};

/// A configured integration instance bridging one device family into the
/// canonical model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A physical or virtual device owned by exactly one connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub connector: ConnectorId,
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Bridge or gateway this device is reached through. Sub-devices of a
    /// Zigbee bridge or a panel share the parent's physical connection.
    #[serde(default)]
    pub parent: Option<DeviceId>,
}

impl Device {
    /// Display label: the name when set, the identifier otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }
}

/// A logical sub-function of a device ("actors", "sensors", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub device: DeviceId,
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}
