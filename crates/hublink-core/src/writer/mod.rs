//! Writers: the three front-ends that turn property state into write
//! commands.
//!
//! All of them funnel through one [`Reconciler`], which owns candidate
//! resolution, eligibility, command construction and the
//! dispatch/abandon state transitions. The front-ends only decide *when*
//! a property is looked at:
//!
//! - [`Scheduler`] scans the [`PropertyIndex`](crate::PropertyIndex) on a
//!   fixed cadence with debounce and stale-dispatch retry.
//! - [`EventWriter`] reacts to in-process state notifications.
//! - [`ExchangeWriter`] reacts to state documents from other processes
//!   and talks to protocol clients directly.

mod event;
mod exchange;
mod periodic;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::command::WriteCommand;
use crate::error::CoreError;
use crate::index::{PropertyRef, is_writable};
use crate::model::{
    ConnectorId, Property, PropertyId, PropertyKind, PropertyOwner, PropertyState, StateGuard,
    StateUpdate,
};
use crate::store::{ConfigurationRepository, PropertyQuery, PropertyStateStore};

pub use event::EventWriter;
pub use exchange::ExchangeWriter;
pub use periodic::{Scheduler, TickOutcome};

// ── Eligibility ──────────────────────────────────────────────────────

/// When a candidate with an expected value may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Periodic scan: a fresh request, or a dispatch older than
    /// `stale_after` that never got confirmed.
    Scheduled { stale_after: TimeDelta },
    /// Notification driven: fresh requests only.
    Immediate,
}

impl Eligibility {
    pub fn admits(self, state: &PropertyState, now: DateTime<Utc>) -> bool {
        if !state.has_expected() {
            return false;
        }
        match self {
            Self::Scheduled { stale_after } => {
                state.pending.is_requested() || state.pending.is_stale(now, stale_after)
            }
            Self::Immediate => state.pending.is_requested(),
        }
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

/// Reconciliation logic shared by every writer of one connector.
#[derive(Clone)]
pub struct Reconciler {
    connector: ConnectorId,
    repository: Arc<dyn ConfigurationRepository>,
    states: Arc<dyn PropertyStateStore>,
}

impl Reconciler {
    pub fn new(
        connector: ConnectorId,
        repository: Arc<dyn ConfigurationRepository>,
        states: Arc<dyn PropertyStateStore>,
    ) -> Self {
        Self {
            connector,
            repository,
            states,
        }
    }

    pub fn connector(&self) -> ConnectorId {
        self.connector
    }

    pub(crate) fn repository(&self) -> &dyn ConfigurationRepository {
        self.repository.as_ref()
    }

    /// Properties of this connector that must be reconsidered after the
    /// state of `property` changed.
    ///
    /// A Dynamic property yields itself plus its Mapped children; a Mapped
    /// property yields itself once its parent is known to belong here.
    /// Everything else resolves to nothing.
    pub fn resolve_candidates(&self, property: PropertyId) -> Vec<PropertyRef> {
        let Some(changed) = self.repository.find_property(property) else {
            debug!(property = %property, "state change for unknown property ignored");
            return Vec::new();
        };

        match changed.kind {
            PropertyKind::Dynamic => {
                let mut candidates = Vec::new();
                if let Some(target) = self.writable_ref(&changed) {
                    candidates.push(target);
                }
                let children = self
                    .repository
                    .find_properties(&PropertyQuery::children_of(changed.id));
                candidates.extend(children.iter().filter_map(|child| self.writable_ref(child)));
                candidates
            }
            PropertyKind::Mapped { parent } => {
                let parent_owned = self
                    .repository
                    .find_property(parent)
                    .and_then(|p| self.resolve_ref(&p))
                    .is_some();
                if parent_owned {
                    self.writable_ref(&changed).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            PropertyKind::Variable => Vec::new(),
        }
    }

    /// Address of `property` if its device belongs to this connector.
    pub(crate) fn resolve_ref(&self, property: &Property) -> Option<PropertyRef> {
        match property.owner {
            PropertyOwner::Device(device) => {
                self.repository
                    .find_device(self.connector, device)
                    .map(|d| PropertyRef {
                        device: d.id,
                        channel: None,
                        property: property.id,
                    })
            }
            PropertyOwner::Channel(channel) => {
                let channel = self.repository.find_channel(channel)?;
                self.repository
                    .find_device(self.connector, channel.device)
                    .map(|d| PropertyRef {
                        device: d.id,
                        channel: Some(channel.id),
                        property: property.id,
                    })
            }
        }
    }

    fn writable_ref(&self, property: &Property) -> Option<PropertyRef> {
        if is_writable(property, self.repository.as_ref()) {
            self.resolve_ref(property)
        } else {
            None
        }
    }

    /// Read the state of `target`. Failures are logged and treated as
    /// "no state" so they only ever skip this one property.
    pub async fn read_state(&self, target: &PropertyRef) -> Option<PropertyState> {
        match self.states.read(target.property).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    connector = %self.connector,
                    device = %target.device,
                    property = %target.property,
                    error = %e,
                    "state read failed, skipping property"
                );
                None
            }
        }
    }

    /// Build a write command for `target` if `state` is eligible.
    pub fn on_candidate(
        &self,
        target: &PropertyRef,
        state: &PropertyState,
        now: DateTime<Utc>,
        eligibility: Eligibility,
    ) -> Option<WriteCommand> {
        eligibility
            .admits(state, now)
            .then(|| WriteCommand::new(self.connector, target, state.clone(), now))
    }

    /// Stamp `command` as dispatched at its creation time, provided the
    /// state is still the snapshot it was built from. Returns `false` when
    /// the state moved on (confirmed, re-requested): the command must then
    /// not be sent.
    pub async fn mark_dispatched(&self, command: &WriteCommand) -> bool {
        let guard = StateGuard::unchanged(command.state());
        match self
            .states
            .update_if(
                command.property(),
                &guard,
                StateUpdate::dispatched(command.created_at()),
            )
            .await
        {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(
                    connector = %self.connector,
                    device = %command.device(),
                    property = %command.property(),
                    "state changed before dispatch, write dropped"
                );
                false
            }
            Err(e) => {
                warn!(
                    connector = %self.connector,
                    device = %command.device(),
                    property = %command.property(),
                    error = %e,
                    "failed to mark property as dispatched"
                );
                true
            }
        }
    }

    /// Give up on `command` after a transmission failure: the expected
    /// value is dropped and the property returns to idle. A state that
    /// already expects something else is left alone.
    pub async fn abandon(&self, command: &WriteCommand, cause: &CoreError) {
        error!(
            connector = %command.connector(),
            device = %command.device(),
            channel = ?command.channel(),
            property = %command.property(),
            error = %cause,
            "property write failed, expected value discarded"
        );
        let guard = StateGuard::expecting(command.value().cloned());
        match self
            .states
            .update_if(command.property(), &guard, StateUpdate::abandoned())
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(
                    property = %command.property(),
                    "state changed since write, nothing to abandon"
                );
            }
            Err(e) => {
                warn!(
                    property = %command.property(),
                    error = %e,
                    "failed to reset abandoned property"
                );
            }
        }
    }
}

// ── Loop clock ───────────────────────────────────────────────────────

/// Wall-clock timestamps that advance with the tokio clock, so loops
/// observe a paused test runtime consistently.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopClock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl LoopClock {
    pub(crate) fn start() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.mono.elapsed()).unwrap_or(TimeDelta::MAX);
        self.wall
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{
        Channel, ChannelId, Connector, DataType, Device, DeviceId, Pending, PropertyValue,
    };
    use crate::store::{MemoryRepository, MemoryStateStore};

    struct Fixture {
        repo: Arc<MemoryRepository>,
        states: Arc<MemoryStateStore>,
        connector: ConnectorId,
        device: DeviceId,
        channel: ChannelId,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = Arc::new(MemoryRepository::new());
            let connector = ConnectorId::new();
            repo.upsert_connector(Connector {
                id: connector,
                identifier: "c".into(),
                name: None,
            });
            let device = DeviceId::new();
            repo.upsert_device(Device {
                id: device,
                connector,
                identifier: "d".into(),
                name: None,
                parent: None,
            });
            let channel = ChannelId::new();
            repo.upsert_channel(Channel {
                id: channel,
                device,
                identifier: "ch".into(),
                name: None,
            });
            Self {
                repo,
                states: Arc::new(MemoryStateStore::new()),
                connector,
                device,
                channel,
            }
        }

        fn property(&self, owner: PropertyOwner, kind: PropertyKind, settable: bool) -> PropertyId {
            let id = PropertyId::new();
            self.repo.upsert_property(Property {
                id,
                owner,
                identifier: format!("p-{id}"),
                kind,
                data_type: DataType::Integer,
                settable,
                queryable: true,
                value: None,
            });
            id
        }

        fn reconciler(&self) -> Reconciler {
            Reconciler::new(self.connector, self.repo.clone(), self.states.clone())
        }
    }

    fn requested() -> PropertyState {
        PropertyState {
            expected_value: Some(PropertyValue::Int(1)),
            pending: Pending::Requested,
            ..PropertyState::default()
        }
    }

    #[test]
    fn dynamic_resolves_itself_and_mapped_children() {
        let fx = Fixture::new();
        let parent = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Dynamic, true);
        let child = fx.property(
            PropertyOwner::Channel(fx.channel),
            PropertyKind::Mapped { parent },
            false,
        );

        let candidates = fx.reconciler().resolve_candidates(parent);
        let ids: Vec<_> = candidates.iter().map(|c| c.property).collect();
        assert_eq!(ids, vec![parent, child]);
        assert_eq!(candidates[1].channel, Some(fx.channel));
    }

    #[test]
    fn foreign_connector_resolves_nothing() {
        let fx = Fixture::new();
        let parent = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Dynamic, true);
        let other = Reconciler::new(ConnectorId::new(), fx.repo.clone(), fx.states.clone());
        assert!(other.resolve_candidates(parent).is_empty());
    }

    #[test]
    fn mapped_needs_owned_parent() {
        let fx = Fixture::new();
        let parent = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Dynamic, true);
        let mapped = fx.property(
            PropertyOwner::Device(fx.device),
            PropertyKind::Mapped { parent },
            false,
        );
        assert_eq!(
            fx.reconciler()
                .resolve_candidates(mapped)
                .iter()
                .map(|c| c.property)
                .collect::<Vec<_>>(),
            vec![mapped]
        );

        let orphan = fx.property(
            PropertyOwner::Device(fx.device),
            PropertyKind::Mapped {
                parent: PropertyId::new(),
            },
            false,
        );
        assert!(fx.reconciler().resolve_candidates(orphan).is_empty());
    }

    #[test]
    fn variable_and_unknown_resolve_nothing() {
        let fx = Fixture::new();
        let variable = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Variable, true);
        assert!(fx.reconciler().resolve_candidates(variable).is_empty());
        assert!(fx.reconciler().resolve_candidates(PropertyId::new()).is_empty());
    }

    #[test]
    fn eligibility_rules() {
        let now = Utc::now();
        let stale_after = TimeDelta::seconds(2);
        let scheduled = Eligibility::Scheduled { stale_after };

        assert!(scheduled.admits(&requested(), now));
        assert!(Eligibility::Immediate.admits(&requested(), now));

        let no_expected = PropertyState {
            pending: Pending::Requested,
            ..PropertyState::default()
        };
        assert!(!scheduled.admits(&no_expected, now));

        let fresh = PropertyState {
            pending: Pending::DispatchedAt(now - TimeDelta::seconds(1)),
            ..requested()
        };
        assert!(!scheduled.admits(&fresh, now));

        let stale = PropertyState {
            pending: Pending::DispatchedAt(now - TimeDelta::seconds(3)),
            ..requested()
        };
        assert!(scheduled.admits(&stale, now));
        assert!(!Eligibility::Immediate.admits(&stale, now));
    }

    #[tokio::test]
    async fn abandon_resets_state() {
        let fx = Fixture::new();
        let prop = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Dynamic, true);
        fx.states.request_write(prop, PropertyValue::Int(5));
        let core = fx.reconciler();
        let target = core.resolve_candidates(prop)[0];

        let now = Utc::now();
        let cmd = core
            .on_candidate(&target, &fx.states.get(prop).unwrap(), now, Eligibility::Immediate)
            .unwrap();
        assert!(core.mark_dispatched(&cmd).await);
        assert_eq!(fx.states.get(prop).unwrap().pending, Pending::DispatchedAt(now));

        core.abandon(&cmd, &timeout(fx.device, prop)).await;
        let state = fx.states.get(prop).unwrap();
        assert_eq!(state.expected_value, None);
        assert_eq!(state.pending, Pending::Idle);
    }

    #[tokio::test]
    async fn confirmed_state_is_not_stamped() {
        let fx = Fixture::new();
        let prop = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Dynamic, true);
        let snapshot = fx.states.request_write(prop, PropertyValue::Int(5));
        let core = fx.reconciler();
        let target = core.resolve_candidates(prop)[0];
        let cmd = core
            .on_candidate(&target, &snapshot, Utc::now(), Eligibility::Immediate)
            .unwrap();

        fx.states.confirm(prop, PropertyValue::Int(5));
        assert!(!core.mark_dispatched(&cmd).await);

        let state = fx.states.get(prop).unwrap();
        assert_eq!(state.expected_value, None);
        assert_eq!(state.pending, Pending::Idle);
    }

    #[tokio::test]
    async fn abandon_keeps_newer_request() {
        let fx = Fixture::new();
        let prop = fx.property(PropertyOwner::Device(fx.device), PropertyKind::Dynamic, true);
        let snapshot = fx.states.request_write(prop, PropertyValue::Int(5));
        let core = fx.reconciler();
        let target = core.resolve_candidates(prop)[0];
        let cmd = core
            .on_candidate(&target, &snapshot, Utc::now(), Eligibility::Immediate)
            .unwrap();
        assert!(core.mark_dispatched(&cmd).await);

        fx.states.request_write(prop, PropertyValue::Int(7));
        core.abandon(&cmd, &timeout(fx.device, prop)).await;

        let state = fx.states.get(prop).unwrap();
        assert_eq!(state.expected_value, Some(PropertyValue::Int(7)));
        assert!(state.pending.is_requested());
    }

    fn timeout(device: DeviceId, property: PropertyId) -> CoreError {
        CoreError::Transmission {
            device,
            property,
            message: "timeout".into(),
        }
    }
}
