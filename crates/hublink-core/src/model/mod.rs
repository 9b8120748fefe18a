// ── Canonical domain model ──
//
// Connectors own devices, devices own channels, and both own properties.

pub mod device;
pub mod entity_id;
pub mod property;
pub mod state;

pub use device::{Channel, Connector, Device};
pub use entity_id::{ChannelId, ConnectorId, DeviceId, PropertyId};
pub use property::{DataType, Property, PropertyKind, PropertyKindTag, PropertyOwner, PropertyValue};
pub use state::{Pending, PropertyState, StateGuard, StateUpdate};
