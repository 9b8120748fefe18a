//! Property write scheduling and reconciliation for IoT connectors.
//!
//! A connector mirrors physical devices as properties. Callers express a
//! desired value by setting a property's expected value and flagging it
//! pending; this crate decides *when* that desire becomes a
//! [`WriteCommand`] handed to the vendor transport, and keeps the pending
//! flag honest afterwards:
//!
//! - **[`Connector`]**: Lifecycle facade. [`connect()`](Connector::connect)
//!   builds the [`PropertyIndex`] and spawns exactly one writer plus the
//!   queue dispatch task; [`disconnect()`](Connector::disconnect) cancels
//!   them and invalidates the indexed states.
//!
//! - **Writers** ([`writer`]): [`Scheduler`] (periodic scan with debounce
//!   and stale-dispatch retry, one write per tick), [`EventWriter`]
//!   (in-process notifications) and [`ExchangeWriter`] (cross-process state
//!   documents, reference-counted clients). All share one [`Reconciler`].
//!
//! - **Stores** ([`store`]): The [`ConfigurationRepository`] and
//!   [`PropertyStateStore`] seams with concurrent in-memory implementations.
//!
//! - **Domain model** ([`model`]): Connectors, devices, channels,
//!   properties and their [`PropertyState`].

pub mod client;
pub mod command;
pub mod config;
pub mod connector;
pub mod error;
pub mod exchange;
pub mod index;
pub mod model;
pub mod store;
pub mod writer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::ProtocolClient;
pub use command::{WriteCommand, WriteQueue, WriteQueueReceiver, write_queue};
pub use config::{ConnectorConfig, WriterMode, WriterTiming};
pub use connector::{Collaborators, ConnectionState, Connector};
pub use error::CoreError;
pub use exchange::{ExchangeBus, LocalExchange, StateDocument, forward_state_events};
pub use index::{PropertyIndex, PropertyRef};
pub use store::{
    ConfigurationRepository, MemoryRepository, MemoryStateStore, PropertyQuery,
    PropertyStateEvent, PropertyStateStore, StateAction, StateNotifications,
};
pub use writer::{Eligibility, EventWriter, ExchangeWriter, Reconciler, Scheduler, TickOutcome};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Channel, ChannelId, ConnectorId, DataType, Device, DeviceId, Pending, Property, PropertyId,
    PropertyKind, PropertyKindTag, PropertyOwner, PropertyState, PropertyValue, StateGuard,
    StateUpdate,
};
