// ── Property state store ──
//
// The engine reads and mutates property state through
// `PropertyStateStore`, and observes changes through
// `StateNotifications`. `MemoryStateStore` implements both and also
// offers the operations that belong to the outer API/protocol layers
// (`request_write`, `confirm`), so a connector can run without an
// external database.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::model::{Pending, PropertyId, PropertyState, PropertyValue, StateGuard, StateUpdate};

const EVENT_CHANNEL_SIZE: usize = 256;

/// What happened to a property state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StateAction {
    Created,
    Updated,
}

/// Notification published after every state mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyStateEvent {
    pub property: PropertyId,
    pub action: StateAction,
    /// State after the mutation.
    pub state: PropertyState,
}

/// Asynchronous access to property state.
#[async_trait]
pub trait PropertyStateStore: Send + Sync {
    /// Current state, or `None` when the property has no state yet.
    async fn read(&self, property: PropertyId) -> Result<Option<PropertyState>, CoreError>;

    /// Apply a partial update, creating the state if needed. Returns the
    /// state after the update.
    async fn update(
        &self,
        property: PropertyId,
        update: StateUpdate,
    ) -> Result<PropertyState, CoreError>;

    /// Apply `update` only if the current state satisfies `guard`, as one
    /// atomic step. Returns `None`, leaving the state untouched, when the
    /// guard fails or the property has no state.
    async fn update_if(
        &self,
        property: PropertyId,
        guard: &StateGuard,
        update: StateUpdate,
    ) -> Result<Option<PropertyState>, CoreError>;
}

/// Source of in-process state change notifications.
pub trait StateNotifications: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<PropertyStateEvent>;
}

// ── In-memory implementation ─────────────────────────────────────────

/// Concurrent in-memory state store with change broadcasting.
pub struct MemoryStateStore {
    states: DashMap<PropertyId, PropertyState>,
    events: broadcast::Sender<PropertyStateEvent>,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            states: DashMap::new(),
            events,
        }
    }

    /// Synchronous snapshot of a property state.
    pub fn get(&self, property: PropertyId) -> Option<PropertyState> {
        self.states.get(&property).map(|s| s.value().clone())
    }

    /// Replace a property state wholesale.
    pub fn insert(&self, property: PropertyId, state: PropertyState) {
        let action = if self.states.insert(property, state.clone()).is_some() {
            StateAction::Updated
        } else {
            StateAction::Created
        };
        self.publish(property, action, state);
    }

    /// Ask for `value` to be written to the device: sets the expected
    /// value and flags the state as requested.
    pub fn request_write(&self, property: PropertyId, value: PropertyValue) -> PropertyState {
        self.apply(property, &StateUpdate::requested(value))
    }

    /// Record a value reported by the device. The write is complete when
    /// the reported value equals the expected one.
    pub fn confirm(&self, property: PropertyId, actual: PropertyValue) -> PropertyState {
        self.modify(property, |state| {
            if state.expected_value.as_ref() == Some(&actual) {
                state.expected_value = None;
                state.pending = Pending::Idle;
            }
            state.actual_value = Some(actual);
            state.valid = true;
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn apply(&self, property: PropertyId, update: &StateUpdate) -> PropertyState {
        self.modify(property, |state| state.apply(update))
    }

    /// Mutate a state under its shard lock, creating it if needed.
    fn modify(&self, property: PropertyId, f: impl FnOnce(&mut PropertyState)) -> PropertyState {
        // The shard lock is released before broadcasting.
        let (action, state) = match self.states.entry(property) {
            Entry::Occupied(mut occupied) => {
                f(occupied.get_mut());
                (StateAction::Updated, occupied.get().clone())
            }
            Entry::Vacant(vacant) => {
                let mut state = PropertyState::default();
                f(&mut state);
                vacant.insert(state.clone());
                (StateAction::Created, state)
            }
        };
        self.publish(property, action, state.clone());
        state
    }

    fn apply_if(
        &self,
        property: PropertyId,
        guard: &StateGuard,
        update: &StateUpdate,
    ) -> Option<PropertyState> {
        let state = {
            let mut entry = self.states.get_mut(&property)?;
            if !guard.holds(entry.value()) {
                return None;
            }
            entry.value_mut().apply(update);
            entry.value().clone()
        };
        self.publish(property, StateAction::Updated, state.clone());
        Some(state)
    }

    fn publish(&self, property: PropertyId, action: StateAction, state: PropertyState) {
        // No subscribers is fine.
        let _ = self.events.send(PropertyStateEvent {
            property,
            action,
            state,
        });
    }
}

#[async_trait]
impl PropertyStateStore for MemoryStateStore {
    async fn read(&self, property: PropertyId) -> Result<Option<PropertyState>, CoreError> {
        Ok(self.get(property))
    }

    async fn update(
        &self,
        property: PropertyId,
        update: StateUpdate,
    ) -> Result<PropertyState, CoreError> {
        Ok(self.apply(property, &update))
    }

    async fn update_if(
        &self,
        property: PropertyId,
        guard: &StateGuard,
        update: StateUpdate,
    ) -> Result<Option<PropertyState>, CoreError> {
        Ok(self.apply_if(property, guard, &update))
    }
}

impl StateNotifications for MemoryStateStore {
    fn subscribe(&self) -> broadcast::Receiver<PropertyStateEvent> {
        self.events.subscribe()
    }
}
