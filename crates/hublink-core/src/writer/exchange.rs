// ── Cross-process writer ──
//
// Consumes state documents from an `ExchangeBus` and sends commands
// straight to the protocol client that owns the target device. The bus
// subscription only exists while at least one client is registered.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Eligibility, LoopClock, Reconciler};
use crate::client::ProtocolClient;
use crate::error::CoreError;
use crate::exchange::{ExchangeBus, StateDocument};
use crate::model::DeviceId;

/// Handle to the cross-process writer. Cheaply cloneable.
#[derive(Clone)]
pub struct ExchangeWriter {
    inner: Arc<ExchangeInner>,
}

struct ExchangeInner {
    core: Reconciler,
    bus: Arc<dyn ExchangeBus>,
    cancel: CancellationToken,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    clients: IndexMap<DeviceId, Arc<dyn ProtocolClient>>,
    subscription: Option<Subscription>,
}

struct Subscription {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExchangeWriter {
    /// Create a writer with no clients. Cancelling `cancel` stops any
    /// subscription it opens later.
    pub fn new(core: Reconciler, bus: Arc<dyn ExchangeBus>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ExchangeInner {
                core,
                bus,
                cancel,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register `client` for device `client_id` and everything below it.
    /// The first registration opens the bus subscription.
    pub async fn connect(&self, client_id: DeviceId, client: Arc<dyn ProtocolClient>) {
        let mut registry = self.inner.registry.lock().await;
        registry.clients.insert(client_id, client);

        if registry.subscription.is_none() {
            registry.subscription = Some(self.subscribe());
            info!(
                connector = %self.inner.core.connector(),
                client = %client_id,
                "exchange subscription enabled"
            );
        }
    }

    /// Unregister `client_id`. The last removal closes the subscription.
    pub async fn disconnect(&self, client_id: DeviceId) {
        let subscription = {
            let mut registry = self.inner.registry.lock().await;
            if registry.clients.shift_remove(&client_id).is_none() || !registry.clients.is_empty() {
                return;
            }
            registry.subscription.take()
        };

        if let Some(subscription) = subscription {
            stop(subscription).await;
            info!(
                connector = %self.inner.core.connector(),
                "exchange subscription disabled"
            );
        }
    }

    /// Drop every client and close the subscription.
    pub async fn shutdown(&self) {
        let subscription = {
            let mut registry = self.inner.registry.lock().await;
            registry.clients.clear();
            registry.subscription.take()
        };
        if let Some(subscription) = subscription {
            stop(subscription).await;
        }
    }

    pub async fn is_subscribed(&self) -> bool {
        self.inner.registry.lock().await.subscription.is_some()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.registry.lock().await.clients.len()
    }

    /// Handle one raw document. Returns how many commands were sent
    /// successfully.
    pub async fn handle_document(
        &self,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let document = StateDocument::decode(payload)?;
        let core = &self.inner.core;

        let candidates = core.resolve_candidates(document.property);
        if candidates.is_empty() {
            trace!(property = %document.property, "document outside this connector ignored");
            return Ok(0);
        }

        let clients: Vec<(DeviceId, Arc<dyn ProtocolClient>)> = {
            let registry = self.inner.registry.lock().await;
            registry
                .clients
                .iter()
                .map(|(id, client)| (*id, Arc::clone(client)))
                .collect()
        };

        let mut sent = 0;
        for target in candidates {
            let Some(client) = self.owning_client(target.device, &clients) else {
                trace!(device = %target.device, "no registered client owns device");
                continue;
            };

            let state = if target.property == document.property {
                Some(document.state.clone())
            } else {
                core.read_state(&target).await
            };
            let Some(state) = state else {
                continue;
            };
            let Some(command) = core.on_candidate(&target, &state, now, Eligibility::Immediate)
            else {
                continue;
            };

            if !core.mark_dispatched(&command).await {
                continue;
            }
            match client.send(&command).await {
                Ok(()) => {
                    debug!(
                        connector = %core.connector(),
                        device = %target.device,
                        property = %target.property,
                        "write sent"
                    );
                    sent += 1;
                }
                Err(e) => core.abandon(&command, &e).await,
            }
        }

        Ok(sent)
    }

    /// The client registered for `device` or its closest ancestor.
    fn owning_client(
        &self,
        device: DeviceId,
        clients: &[(DeviceId, Arc<dyn ProtocolClient>)],
    ) -> Option<Arc<dyn ProtocolClient>> {
        let core = &self.inner.core;
        let mut seen = HashSet::new();
        let mut current = Some(device);

        while let Some(id) = current {
            if !seen.insert(id) {
                warn!(device = %device, "device parent chain has a cycle");
                return None;
            }
            if let Some((_, client)) = clients.iter().find(|(cid, _)| *cid == id) {
                return Some(Arc::clone(client));
            }
            current = core
                .repository()
                .find_device(core.connector(), id)
                .and_then(|d| d.parent);
        }
        None
    }

    fn subscribe(&self) -> Subscription {
        let cancel = self.inner.cancel.child_token();
        let receiver = self.inner.bus.subscribe();
        let handle = tokio::spawn(consume(
            Arc::downgrade(&self.inner),
            receiver,
            cancel.clone(),
        ));
        Subscription { cancel, handle }
    }
}

async fn stop(subscription: Subscription) {
    subscription.cancel.cancel();
    if let Err(e) = subscription.handle.await {
        warn!(error = %e, "exchange subscription task failed");
    }
}

async fn consume(
    writer: Weak<ExchangeInner>,
    mut documents: broadcast::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let clock = LoopClock::start();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = documents.recv() => match result {
                Ok(payload) => {
                    let Some(inner) = writer.upgrade() else {
                        break;
                    };
                    let writer = ExchangeWriter { inner };
                    if let Err(e) = writer.handle_document(&payload, clock.now()).await {
                        warn!(error = %e, "state document ignored");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "exchange subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("exchange subscription stopped");
}
