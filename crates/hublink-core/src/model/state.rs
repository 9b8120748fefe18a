// ── Property state ──
//
// The live (actual, expected, pending, valid) quadruple of a dynamic
// property. The core only ever performs three transitions on it:
// Requested -> DispatchedAt(now), stale DispatchedAt -> DispatchedAt(now),
// and abandon (expected cleared, pending Idle) on transmission failure.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::property::PropertyValue;

/// Write marker of a property state.
///
/// Serialized as `false` (idle), `true` (requested) or an RFC 3339
/// timestamp (dispatched at).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PendingRepr", into = "PendingRepr")]
pub enum Pending {
    #[default]
    Idle,
    Requested,
    DispatchedAt(DateTime<Utc>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PendingRepr {
    Flag(bool),
    At(DateTime<Utc>),
}

impl From<PendingRepr> for Pending {
    fn from(repr: PendingRepr) -> Self {
        match repr {
            PendingRepr::Flag(false) => Self::Idle,
            PendingRepr::Flag(true) => Self::Requested,
            PendingRepr::At(at) => Self::DispatchedAt(at),
        }
    }
}

impl From<Pending> for PendingRepr {
    fn from(pending: Pending) -> Self {
        match pending {
            Pending::Idle => Self::Flag(false),
            Pending::Requested => Self::Flag(true),
            Pending::DispatchedAt(at) => Self::At(at),
        }
    }
}

impl Pending {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Requested)
    }

    pub fn dispatched_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DispatchedAt(at) => Some(*at),
            Self::Idle | Self::Requested => None,
        }
    }

    /// A dispatch older than `stale_after` is considered lost.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> bool {
        self.dispatched_at()
            .is_some_and(|at| now.signed_duration_since(at) > stale_after)
    }
}

/// Live state of a dynamic (or mapped-over-dynamic) property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyState {
    #[serde(default)]
    pub actual_value: Option<PropertyValue>,
    #[serde(default)]
    pub expected_value: Option<PropertyValue>,
    #[serde(default)]
    pub pending: Pending,
    #[serde(default)]
    pub valid: bool,
}

impl Default for PropertyState {
    fn default() -> Self {
        Self {
            actual_value: None,
            expected_value: None,
            pending: Pending::Idle,
            valid: false,
        }
    }
}

impl PropertyState {
    /// Whether a desired value is waiting to reach the device.
    pub fn has_expected(&self) -> bool {
        self.expected_value.is_some()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &StateUpdate) {
        if let Some(ref actual) = update.actual_value {
            self.actual_value.clone_from(actual);
        }
        if let Some(ref expected) = update.expected_value {
            self.expected_value.clone_from(expected);
        }
        if let Some(pending) = update.pending {
            self.pending = pending;
        }
        if let Some(valid) = update.valid {
            self.valid = valid;
        }
    }
}

/// Partial property state update. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub actual_value: Option<Option<PropertyValue>>,
    pub expected_value: Option<Option<PropertyValue>>,
    pub pending: Option<Pending>,
    pub valid: Option<bool>,
}

impl StateUpdate {
    /// Stamp a write as handed to the transport at `at`.
    pub fn dispatched(at: DateTime<Utc>) -> Self {
        Self {
            pending: Some(Pending::DispatchedAt(at)),
            ..Self::default()
        }
    }

    /// Give up on a write: nothing is desired any more, nothing pending.
    pub fn abandoned() -> Self {
        Self {
            expected_value: Some(None),
            pending: Some(Pending::Idle),
            ..Self::default()
        }
    }

    /// Mark the actual value as untrusted (connector stopped, device lost).
    pub fn invalidated() -> Self {
        Self {
            valid: Some(false),
            ..Self::default()
        }
    }

    /// Request a new desired value.
    pub fn requested(value: PropertyValue) -> Self {
        Self {
            expected_value: Some(Some(value)),
            pending: Some(Pending::Requested),
            ..Self::default()
        }
    }
}

/// Precondition of a conditional state update.
///
/// Built from the snapshot a writer acted on, so a store can refuse the
/// update once the state has moved on (a confirmation, a new request).
#[derive(Debug, Clone, PartialEq)]
pub struct StateGuard {
    pub expected_value: Option<PropertyValue>,
    /// `None` accepts any pending marker.
    pub pending: Option<Pending>,
}

impl StateGuard {
    /// The state still has the snapshot's expected value and pending marker.
    pub fn unchanged(snapshot: &PropertyState) -> Self {
        Self {
            expected_value: snapshot.expected_value.clone(),
            pending: Some(snapshot.pending),
        }
    }

    /// The state still expects `value`, whatever its pending marker.
    pub fn expecting(value: Option<PropertyValue>) -> Self {
        Self {
            expected_value: value,
            pending: None,
        }
    }

    pub fn holds(&self, state: &PropertyState) -> bool {
        state.expected_value == self.expected_value
            && self.pending.is_none_or(|pending| pending == state.pending)
    }
}
