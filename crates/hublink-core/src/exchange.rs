//! Cross-process state exchange.
//!
//! Property state changes made by other processes (API servers, other
//! connectors) travel over a publish/subscribe bus as JSON
//! [`StateDocument`]s. [`LocalExchange`] is an in-process bus backed by a
//! [`tokio::sync::broadcast`] channel; real deployments plug a broker
//! client in behind [`ExchangeBus`].

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{PropertyId, PropertyState};
use crate::store::PropertyStateEvent;

const EXCHANGE_CHANNEL_CAPACITY: usize = 1024;

// ── StateDocument ────────────────────────────────────────────────────

/// Serialized property state as carried by the bus.
///
/// Addressed by property id and self-contained: a writer can build a
/// command from it without reading the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub property: PropertyId,
    #[serde(flatten)]
    pub state: PropertyState,
}

impl StateDocument {
    pub fn encode(&self) -> Result<Bytes, CoreError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl From<&PropertyStateEvent> for StateDocument {
    fn from(event: &PropertyStateEvent) -> Self {
        Self {
            property: event.property,
            state: event.state.clone(),
        }
    }
}

// ── ExchangeBus ──────────────────────────────────────────────────────

/// Publish/subscribe transport for state documents.
pub trait ExchangeBus: Send + Sync {
    /// Open a new subscription. Dropping the receiver ends it.
    fn subscribe(&self) -> broadcast::Receiver<Bytes>;

    /// Publish a payload. Returns how many subscribers received it.
    fn publish(&self, payload: Bytes) -> Result<usize, CoreError>;
}

/// In-process bus.
pub struct LocalExchange {
    tx: broadcast::Sender<Bytes>,
}

impl Default for LocalExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExchange {
    pub fn new() -> Self {
        Self::with_capacity(EXCHANGE_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ExchangeBus for LocalExchange {
    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    fn publish(&self, payload: Bytes) -> Result<usize, CoreError> {
        // Nobody listening is not an error.
        Ok(self.tx.send(payload).unwrap_or(0))
    }
}

/// Publish every in-process state notification onto `bus` until
/// cancelled. This is the producing half other processes would run.
pub async fn forward_state_events(
    mut events: broadcast::Receiver<PropertyStateEvent>,
    bus: Arc<dyn ExchangeBus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = events.recv() => match result {
                Ok(event) => {
                    let published = StateDocument::from(&event)
                        .encode()
                        .and_then(|payload| bus.publish(payload));
                    if let Err(e) = published {
                        warn!(
                            property = %event.property,
                            error = %e,
                            "failed to publish state document"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "state forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("state forwarder stopped");
}
