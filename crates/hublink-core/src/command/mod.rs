// ── Write commands ──
//
// A `WriteCommand` is the only thing that crosses from the engine to a
// protocol client. It is built once from a state snapshot and never
// mutated afterwards.

mod queue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::PropertyRef;
use crate::model::{ChannelId, ConnectorId, DeviceId, PropertyId, PropertyState, PropertyValue};

pub use queue::{WriteQueue, WriteQueueReceiver, write_queue};

/// Immutable instruction to push a property value to a physical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteCommand {
    connector: ConnectorId,
    device: DeviceId,
    channel: Option<ChannelId>,
    property: PropertyId,
    state: PropertyState,
    created_at: DateTime<Utc>,
}

impl WriteCommand {
    pub fn new(
        connector: ConnectorId,
        target: &PropertyRef,
        state: PropertyState,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            connector,
            device: target.device,
            channel: target.channel,
            property: target.property,
            state,
            created_at,
        }
    }

    pub fn connector(&self) -> ConnectorId {
        self.connector
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn property(&self) -> PropertyId {
        self.property
    }

    /// State snapshot taken when the command was built.
    pub fn state(&self) -> &PropertyState {
        &self.state
    }

    /// Value to write.
    pub fn value(&self) -> Option<&PropertyValue> {
        self.state.expected_value.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Address of the property this command writes.
    pub fn target(&self) -> PropertyRef {
        PropertyRef {
            device: self.device,
            channel: self.channel,
            property: self.property,
        }
    }
}
