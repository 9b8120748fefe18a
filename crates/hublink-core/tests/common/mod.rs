// Shared fixtures for the integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use hublink_core::model::Connector as ConnectorEntity;
use hublink_core::{
    Channel, ChannelId, ConnectorId, CoreError, DataType, Device, DeviceId, MemoryRepository,
    MemoryStateStore, Property, PropertyId, PropertyIndex, PropertyKind, PropertyOwner,
    ProtocolClient, Reconciler, WriteCommand,
};

// ── World ───────────────────────────────────────────────────────────

/// One connector with in-memory collaborators.
pub struct World {
    pub repo: Arc<MemoryRepository>,
    pub states: Arc<MemoryStateStore>,
    pub connector: ConnectorId,
}

impl World {
    pub fn new() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let connector = add_connector(&repo, "primary");
        Self {
            repo,
            states: Arc::new(MemoryStateStore::new()),
            connector,
        }
    }

    /// Register another connector in the same repository.
    pub fn other_connector(&self) -> ConnectorId {
        add_connector(&self.repo, "other")
    }

    pub fn device(&self, identifier: &str) -> DeviceId {
        self.device_in(self.connector, identifier, None)
    }

    pub fn child_device(&self, identifier: &str, parent: DeviceId) -> DeviceId {
        self.device_in(self.connector, identifier, Some(parent))
    }

    pub fn device_in(
        &self,
        connector: ConnectorId,
        identifier: &str,
        parent: Option<DeviceId>,
    ) -> DeviceId {
        let id = DeviceId::new();
        self.repo.upsert_device(Device {
            id,
            connector,
            identifier: identifier.into(),
            name: None,
            parent,
        });
        id
    }

    pub fn channel(&self, device: DeviceId, identifier: &str) -> ChannelId {
        let id = ChannelId::new();
        self.repo.upsert_channel(Channel {
            id,
            device,
            identifier: identifier.into(),
            name: None,
        });
        id
    }

    pub fn property(&self, owner: PropertyOwner, kind: PropertyKind, settable: bool) -> PropertyId {
        let id = PropertyId::new();
        self.repo.upsert_property(Property {
            id,
            owner,
            identifier: format!("prop-{}", self.repo.property_count()),
            kind,
            data_type: DataType::Float,
            settable,
            queryable: true,
            value: None,
        });
        id
    }

    /// Settable Dynamic property directly on `device`.
    pub fn dynamic(&self, device: DeviceId) -> PropertyId {
        self.property(PropertyOwner::Device(device), PropertyKind::Dynamic, true)
    }

    pub fn mapped(&self, owner: PropertyOwner, parent: PropertyId) -> PropertyId {
        self.property(owner, PropertyKind::Mapped { parent }, false)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.connector, self.repo.clone(), self.states.clone())
    }

    pub fn index(&self) -> Arc<PropertyIndex> {
        Arc::new(PropertyIndex::build(self.connector, self.repo.as_ref()))
    }
}

fn add_connector(repo: &MemoryRepository, identifier: &str) -> ConnectorId {
    let id = ConnectorId::new();
    repo.upsert_connector(ConnectorEntity {
        id,
        identifier: identifier.into(),
        name: None,
    });
    id
}

// ── RecordingClient ─────────────────────────────────────────────────

/// Protocol client that records every command and optionally fails.
#[derive(Default)]
pub struct RecordingClient {
    sent: Mutex<Vec<WriteCommand>>,
    failing: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let client = Self::default();
        client.failing.store(true, Ordering::SeqCst);
        Arc::new(client)
    }

    pub fn sent(&self) -> Vec<WriteCommand> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolClient for RecordingClient {
    async fn send(&self, command: &WriteCommand) -> Result<(), CoreError> {
        self.sent.lock().unwrap().push(command.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Transmission {
                device: command.device(),
                property: command.property(),
                message: "device unreachable".into(),
            });
        }
        Ok(())
    }
}
