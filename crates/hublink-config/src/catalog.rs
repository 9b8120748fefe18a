// ── Device catalog ──
//
// TOML description of the configured model, used to seed the in-memory
// repository and state store. Entities reference each other by
// identifier; ids are taken from the file when present and generated
// otherwise.
//
// Mapped properties name their parent as `device/property` or
// `device/channel/property`, resolved inside the same connector.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use hublink_core::model::Connector;
use hublink_core::{
    Channel, ChannelId, ConnectorId, DataType, Device, DeviceId, MemoryRepository,
    MemoryStateStore, Property, PropertyId, PropertyKind, PropertyOwner, PropertyValue,
};

use crate::ConfigError;

// ── TOML structs ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub connectors: Vec<ConnectorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorEntry {
    pub id: Option<Uuid>,
    pub identifier: String,
    pub name: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub id: Option<Uuid>,
    pub identifier: String,
    pub name: Option<String>,
    /// Identifier of the bridge device this one is reached through.
    pub parent: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyEntry>,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    pub id: Option<Uuid>,
    pub identifier: String,
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindEntry {
    #[default]
    Dynamic,
    Variable,
    Mapped,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyEntry {
    pub id: Option<Uuid>,
    pub identifier: String,
    #[serde(default)]
    pub kind: KindEntry,
    /// Parent path of a mapped property.
    pub parent: Option<String>,
    #[serde(default = "default_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub settable: bool,
    #[serde(default)]
    pub queryable: bool,
    /// Stored value of a variable property.
    pub value: Option<PropertyValue>,
    /// Last value reported by the device.
    pub actual: Option<PropertyValue>,
    /// Value waiting to be written.
    pub expected: Option<PropertyValue>,
}

fn default_data_type() -> DataType {
    DataType::Unknown
}

// ── Loading ─────────────────────────────────────────────────────────

/// Read and parse a catalog file.
pub fn load_catalog(path: &Path) -> Result<Catalog, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Catalog::parse(&text)
}

impl Catalog {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Insert every entity into `repository` and seed `states`. Returns
    /// the connector ids in catalog order.
    pub fn populate(
        &self,
        repository: &MemoryRepository,
        states: &MemoryStateStore,
    ) -> Result<Vec<ConnectorId>, ConfigError> {
        let mut ids = Vec::with_capacity(self.connectors.len());
        for entry in &self.connectors {
            ids.push(populate_connector(entry, repository, states)?);
        }
        Ok(ids)
    }
}

// ── Population ──────────────────────────────────────────────────────

/// A property whose id is assigned but which is not inserted yet.
struct Staged<'a> {
    id: PropertyId,
    owner: PropertyOwner,
    entry: &'a PropertyEntry,
}

fn populate_connector(
    entry: &ConnectorEntry,
    repository: &MemoryRepository,
    states: &MemoryStateStore,
) -> Result<ConnectorId, ConfigError> {
    let connector = entry.id.map_or_else(ConnectorId::new, ConnectorId::from);
    repository.upsert_connector(Connector {
        id: connector,
        identifier: entry.identifier.clone(),
        name: entry.name.clone(),
    });

    // First pass: assign ids so parents can be referenced in any order.
    let mut device_ids: HashMap<&str, DeviceId> = HashMap::new();
    let mut paths: HashMap<String, PropertyId> = HashMap::new();
    let mut staged = Vec::new();
    let mut devices = Vec::with_capacity(entry.devices.len());
    let mut channels = Vec::new();

    for device in &entry.devices {
        let device_id = device.id.map_or_else(DeviceId::new, DeviceId::from);
        if device_ids.insert(&device.identifier, device_id).is_some() {
            return Err(duplicate("device", &device.identifier));
        }
        devices.push((device, device_id));

        for property in &device.properties {
            let id = property.id.map_or_else(PropertyId::new, PropertyId::from);
            let path = format!("{}/{}", device.identifier, property.identifier);
            if paths.insert(path.clone(), id).is_some() {
                return Err(duplicate("property", &path));
            }
            staged.push(Staged {
                id,
                owner: PropertyOwner::Device(device_id),
                entry: property,
            });
        }

        for channel in &device.channels {
            let channel_id = channel.id.map_or_else(ChannelId::new, ChannelId::from);
            channels.push(Channel {
                id: channel_id,
                device: device_id,
                identifier: channel.identifier.clone(),
                name: channel.name.clone(),
            });
            for property in &channel.properties {
                let id = property.id.map_or_else(PropertyId::new, PropertyId::from);
                let path = format!(
                    "{}/{}/{}",
                    device.identifier, channel.identifier, property.identifier
                );
                if paths.insert(path.clone(), id).is_some() {
                    return Err(duplicate("property", &path));
                }
                staged.push(Staged {
                    id,
                    owner: PropertyOwner::Channel(channel_id),
                    entry: property,
                });
            }
        }
    }

    // Second pass: insert, parents before children.
    for (device, id) in devices {
        let parent = match device.parent.as_deref() {
            Some(identifier) => Some(*device_ids.get(identifier).ok_or_else(|| {
                ConfigError::Validation {
                    field: format!("device {} parent", device.identifier),
                    reason: format!("unknown device '{identifier}'"),
                }
            })?),
            None => None,
        };
        repository.upsert_device(Device {
            id,
            connector,
            identifier: device.identifier.clone(),
            name: device.name.clone(),
            parent,
        });
    }
    for channel in channels {
        repository.upsert_channel(channel);
    }

    for item in &staged {
        let kind = property_kind(item.entry, &paths)?;
        repository.upsert_property(Property {
            id: item.id,
            owner: item.owner,
            identifier: item.entry.identifier.clone(),
            kind,
            data_type: item.entry.data_type,
            settable: item.entry.settable,
            queryable: item.entry.queryable,
            value: item.entry.value.clone(),
        });

        if let Some(actual) = &item.entry.actual {
            states.confirm(item.id, actual.clone());
        }
        if let Some(expected) = &item.entry.expected {
            states.request_write(item.id, expected.clone());
        }
    }

    debug!(
        connector = %connector,
        devices = entry.devices.len(),
        properties = staged.len(),
        "catalog connector loaded"
    );
    Ok(connector)
}

fn property_kind(
    entry: &PropertyEntry,
    paths: &HashMap<String, PropertyId>,
) -> Result<PropertyKind, ConfigError> {
    match entry.kind {
        KindEntry::Dynamic => Ok(PropertyKind::Dynamic),
        KindEntry::Variable => Ok(PropertyKind::Variable),
        KindEntry::Mapped => {
            let path = entry.parent.as_deref().ok_or_else(|| ConfigError::Validation {
                field: format!("property {} parent", entry.identifier),
                reason: "mapped properties need a parent".into(),
            })?;
            let parent = paths.get(path).ok_or_else(|| ConfigError::Validation {
                field: format!("property {} parent", entry.identifier),
                reason: format!("unknown property '{path}'"),
            })?;
            Ok(PropertyKind::Mapped { parent: *parent })
        }
    }
}

fn duplicate(entity: &str, identifier: &str) -> ConfigError {
    ConfigError::Validation {
        field: entity.into(),
        reason: format!("duplicate identifier '{identifier}'"),
    }
}
