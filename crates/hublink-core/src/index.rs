// ── Property index ──
//
// Per-connector map of every property the writers may push to hardware,
// grouped by device. Built once at connect time from the configuration
// repository; order is the repository's order (direct device properties
// first, then channel properties channel by channel).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ChannelId, ConnectorId, Device, DeviceId, Property, PropertyId, PropertyOwner};
use crate::store::{ConfigurationRepository, PropertyQuery};

/// Address of a writable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub device: DeviceId,
    pub channel: Option<ChannelId>,
    pub property: PropertyId,
}

/// Writable properties of one connector, keyed by device then property.
#[derive(Debug, Clone)]
pub struct PropertyIndex {
    connector: ConnectorId,
    devices: IndexMap<DeviceId, IndexMap<PropertyId, PropertyRef>>,
}

impl PropertyIndex {
    /// Build the index for `connector`. A connector without devices
    /// yields an empty index.
    pub fn build(connector: ConnectorId, repository: &dyn ConfigurationRepository) -> Self {
        let mut devices = IndexMap::new();

        for device in repository.find_devices(connector) {
            let entries = device_entries(&device, repository);
            devices.insert(device.id, entries);
        }

        let index = Self { connector, devices };
        debug!(
            connector = %connector,
            devices = index.device_count(),
            properties = index.len(),
            "property index built"
        );
        index
    }

    /// Index with no devices, used while a connector is disconnected.
    pub fn empty(connector: ConnectorId) -> Self {
        Self {
            connector,
            devices: IndexMap::new(),
        }
    }

    pub fn connector(&self) -> ConnectorId {
        self.connector
    }

    /// Device ids in scan order.
    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.keys().copied()
    }

    /// Writable properties of `device` in scan order. Empty for unknown
    /// devices.
    pub fn properties(&self, device: DeviceId) -> impl Iterator<Item = &PropertyRef> + '_ {
        self.devices
            .get(&device)
            .into_iter()
            .flat_map(IndexMap::values)
    }

    /// Every indexed property across all devices.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyRef> + '_ {
        self.devices.values().flat_map(IndexMap::values)
    }

    pub fn get(&self, property: PropertyId) -> Option<&PropertyRef> {
        self.devices.values().find_map(|props| props.get(&property))
    }

    pub fn contains(&self, property: PropertyId) -> bool {
        self.get(property).is_some()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of indexed properties.
    pub fn len(&self) -> usize {
        self.devices.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn device_entries(
    device: &Device,
    repository: &dyn ConfigurationRepository,
) -> IndexMap<PropertyId, PropertyRef> {
    let mut entries = IndexMap::new();

    let direct =
        repository.find_properties(&PropertyQuery::owned_by(PropertyOwner::Device(device.id)));
    for property in direct.iter().filter(|p| is_writable(p, repository)) {
        entries.insert(
            property.id,
            PropertyRef {
                device: device.id,
                channel: None,
                property: property.id,
            },
        );
    }

    for channel in repository.find_channels(device.id) {
        let owned = repository
            .find_properties(&PropertyQuery::owned_by(PropertyOwner::Channel(channel.id)));
        for property in owned.iter().filter(|p| is_writable(p, repository)) {
            entries.insert(
                property.id,
                PropertyRef {
                    device: device.id,
                    channel: Some(channel.id),
                    property: property.id,
                },
            );
        }
    }

    entries
}

/// Settable dynamic properties, and mapped properties over a settable
/// dynamic or variable parent.
pub(crate) fn is_writable(property: &Property, repository: &dyn ConfigurationRepository) -> bool {
    match property.parent() {
        None => property.is_dynamic() && property.settable,
        Some(parent) => repository
            .find_property(parent)
            .is_some_and(|p| p.settable && (p.is_dynamic() || p.is_variable())),
    }
}
