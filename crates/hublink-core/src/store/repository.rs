// ── Configuration repository ──
//
// Resolves connector/device/channel/property ids into descriptors. The
// engine only ever reads through `ConfigurationRepository`; lookups of
// missing or foreign ids return `None` (or nothing), never an error.

use std::sync::Arc;

use super::collection::EntityCollection;
use crate::model::{
    Channel, ChannelId, Connector, ConnectorId, Device, DeviceId, Property, PropertyId,
    PropertyKindTag, PropertyOwner,
};

/// Property filter for [`ConfigurationRepository::find_properties`].
///
/// Every `Some` field must match; an empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyQuery {
    pub owner: Option<PropertyOwner>,
    pub settable: Option<bool>,
    pub kind: Option<PropertyKindTag>,
    pub parent: Option<PropertyId>,
}

impl PropertyQuery {
    pub fn owned_by(owner: PropertyOwner) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    /// Mapped properties deriving from `parent`.
    pub fn children_of(parent: PropertyId) -> Self {
        Self {
            kind: Some(PropertyKindTag::Mapped),
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn settable(mut self, settable: bool) -> Self {
        self.settable = Some(settable);
        self
    }

    pub fn kind(mut self, kind: PropertyKindTag) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, property: &Property) -> bool {
        self.owner.is_none_or(|owner| property.owner == owner)
            && self.settable.is_none_or(|s| property.settable == s)
            && self.kind.is_none_or(|k| property.kind.tag() == k)
            && self.parent.is_none_or(|p| property.parent() == Some(p))
    }
}

/// Read access to the configured model.
///
/// Implementations are expected to be cached, in-memory lookups: the
/// writers call them from their hot loops.
pub trait ConfigurationRepository: Send + Sync {
    fn find_connector(&self, id: ConnectorId) -> Option<Connector>;

    /// All devices of a connector, in a stable order.
    fn find_devices(&self, connector: ConnectorId) -> Vec<Device>;

    /// A device, only if it belongs to `connector`.
    fn find_device(&self, connector: ConnectorId, id: DeviceId) -> Option<Device>;

    fn find_channel(&self, id: ChannelId) -> Option<Channel>;

    /// All channels of a device, in a stable order.
    fn find_channels(&self, device: DeviceId) -> Vec<Channel>;

    fn find_property(&self, id: PropertyId) -> Option<Property>;

    /// Properties matching `query`, in a stable order.
    fn find_properties(&self, query: &PropertyQuery) -> Vec<Property>;
}

// ── In-memory implementation ─────────────────────────────────────────

/// Concurrent in-memory repository.
///
/// Snapshots preserve insertion order, which in turn defines the scan
/// order of the property index.
pub struct MemoryRepository {
    connectors: EntityCollection<ConnectorId, Connector>,
    devices: EntityCollection<DeviceId, Device>,
    channels: EntityCollection<ChannelId, Channel>,
    properties: EntityCollection<PropertyId, Property>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            connectors: EntityCollection::new(),
            devices: EntityCollection::new(),
            channels: EntityCollection::new(),
            properties: EntityCollection::new(),
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Insert or replace a connector. Returns `true` if it was new.
    pub fn upsert_connector(&self, connector: Connector) -> bool {
        self.connectors.upsert(connector.id, connector)
    }

    pub fn upsert_device(&self, device: Device) -> bool {
        self.devices.upsert(device.id, device)
    }

    pub fn upsert_channel(&self, channel: Channel) -> bool {
        self.channels.upsert(channel.id, channel)
    }

    pub fn upsert_property(&self, property: Property) -> bool {
        self.properties.upsert(property.id, property)
    }

    /// Remove a device together with its channels and all their properties.
    pub fn remove_device(&self, id: DeviceId) -> Option<Arc<Device>> {
        let removed = self.devices.remove(&id)?;

        for channel in self.find_channels(id) {
            self.remove_channel(channel.id);
        }
        for property in self.find_properties(&PropertyQuery::owned_by(PropertyOwner::Device(id))) {
            self.properties.remove(&property.id);
        }

        Some(removed)
    }

    /// Remove a channel together with its properties.
    pub fn remove_channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        let removed = self.channels.remove(&id)?;
        for property in self.find_properties(&PropertyQuery::owned_by(PropertyOwner::Channel(id))) {
            self.properties.remove(&property.id);
        }
        Some(removed)
    }

    pub fn remove_property(&self, id: PropertyId) -> Option<Arc<Property>> {
        self.properties.remove(&id)
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty() && self.devices.is_empty()
    }
}

impl ConfigurationRepository for MemoryRepository {
    fn find_connector(&self, id: ConnectorId) -> Option<Connector> {
        self.connectors.get(&id).map(|c| (*c).clone())
    }

    fn find_devices(&self, connector: ConnectorId) -> Vec<Device> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.connector == connector)
            .map(|d| (**d).clone())
            .collect()
    }

    fn find_device(&self, connector: ConnectorId, id: DeviceId) -> Option<Device> {
        self.devices
            .get(&id)
            .filter(|d| d.connector == connector)
            .map(|d| (*d).clone())
    }

    fn find_channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).map(|c| (*c).clone())
    }

    fn find_channels(&self, device: DeviceId) -> Vec<Channel> {
        self.channels
            .snapshot()
            .iter()
            .filter(|c| c.device == device)
            .map(|c| (**c).clone())
            .collect()
    }

    fn find_property(&self, id: PropertyId) -> Option<Property> {
        self.properties.get(&id).map(|p| (*p).clone())
    }

    fn find_properties(&self, query: &PropertyQuery) -> Vec<Property> {
        self.properties
            .snapshot()
            .iter()
            .filter(|p| query.matches(p))
            .map(|p| (**p).clone())
            .collect()
    }
}
