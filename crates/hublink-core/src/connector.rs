// ── Connector lifecycle ──
//
// Owns everything one connector instance runs while connected: the
// property index, the write queue with its dispatch task, and exactly one
// active writer. Disconnect tears all of it down; reconnect starts from a
// fresh index and empty scheduler bookkeeping.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ProtocolClient;
use crate::command::{WriteQueueReceiver, write_queue};
use crate::config::{ConnectorConfig, WriterMode};
use crate::error::CoreError;
use crate::exchange::ExchangeBus;
use crate::index::PropertyIndex;
use crate::model::{ConnectorId, DeviceId, StateUpdate};
use crate::store::{ConfigurationRepository, PropertyStateStore, StateNotifications};
use crate::writer::{EventWriter, ExchangeWriter, Reconciler, Scheduler};

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The active writer hit a fatal error. `disconnect()` resets it.
    Failed,
}

// ── Collaborators ────────────────────────────────────────────────────

/// External services a connector depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn ConfigurationRepository>,
    pub states: Arc<dyn PropertyStateStore>,
    pub client: Arc<dyn ProtocolClient>,
    /// Required by [`WriterMode::Event`].
    pub notifications: Option<Arc<dyn StateNotifications>>,
    /// Required by [`WriterMode::Exchange`].
    pub exchange: Option<Arc<dyn ExchangeBus>>,
}

impl Collaborators {
    pub fn new(
        repository: Arc<dyn ConfigurationRepository>,
        states: Arc<dyn PropertyStateStore>,
        client: Arc<dyn ProtocolClient>,
    ) -> Self {
        Self {
            repository,
            states,
            client,
            notifications: None,
            exchange: None,
        }
    }

    #[must_use]
    pub fn with_notifications(mut self, notifications: Arc<dyn StateNotifications>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: Arc<dyn ExchangeBus>) -> Self {
        self.exchange = Some(exchange);
        self
    }
}

/// What the dispatch task does when the protocol client rejects a
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    /// Leave the state alone; the stale-dispatch retry resends it.
    Retry,
    /// Drop the expected value and return to idle.
    Abandon,
}

// ── Connector ────────────────────────────────────────────────────────

/// Write-side runtime of one connector.
///
/// Cheaply cloneable via `Arc<ConnectorInner>`.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

struct ConnectorInner {
    config: ConnectorConfig,
    collaborators: Collaborators,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    /// Child token for the current connection, replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    index: ArcSwap<PropertyIndex>,
    exchange: Mutex<Option<ExchangeWriter>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector {
    /// Create a connector. Does NOT start anything; call
    /// [`connect()`](Self::connect).
    pub fn new(config: ConnectorConfig, collaborators: Collaborators) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();
        let index = ArcSwap::from_pointee(PropertyIndex::empty(config.connector));

        Self {
            inner: Arc::new(ConnectorInner {
                config,
                collaborators,
                connection_state,
                cancel,
                cancel_child: Mutex::new(cancel_child),
                index,
                exchange: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ConnectorId {
        self.inner.config.connector
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Build the property index and start the configured writer.
    pub async fn connect(&self) -> Result<(), CoreError> {
        // Check and claim in one step so concurrent callers cannot both start.
        let claimed = self.inner.connection_state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(CoreError::AlreadyConnected { id: self.id() });
        }

        if let Err(e) = self.start().await {
            self.inner
                .index
                .store(Arc::new(PropertyIndex::empty(self.id())));
            self.inner
                .connection_state
                .send_replace(ConnectionState::Disconnected);
            return Err(e);
        }

        self.inner
            .connection_state
            .send_replace(ConnectionState::Connected);
        info!(
            connector = %self.id(),
            writer = %self.inner.config.writer,
            "connector started"
        );
        Ok(())
    }

    async fn start(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let collab = &self.inner.collaborators;

        config.timing.validate()?;
        if collab.repository.find_connector(config.connector).is_none() {
            return Err(CoreError::ConnectorNotFound {
                id: config.connector,
            });
        }

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let index = Arc::new(PropertyIndex::build(
            config.connector,
            collab.repository.as_ref(),
        ));
        self.inner.index.store(Arc::clone(&index));

        let core = Reconciler::new(
            config.connector,
            Arc::clone(&collab.repository),
            Arc::clone(&collab.states),
        );

        let mut handles = self.inner.task_handles.lock().await;
        match config.writer {
            WriterMode::Periodic => {
                let (queue, rx) = write_queue();
                handles.push(self.spawn_dispatch(core.clone(), rx, FailurePolicy::Retry, &child));
                let scheduler = Scheduler::new(core, index, queue, config.timing);
                handles.push(self.spawn_writer(scheduler.run(child)));
            }
            WriterMode::Event => {
                let notifications = collab.notifications.as_ref().ok_or_else(|| CoreError::Config {
                    message: "event writer needs a state notification source".into(),
                })?;
                // Subscribe before spawning so no notification is missed.
                let events = notifications.subscribe();
                let (queue, rx) = write_queue();
                handles.push(self.spawn_dispatch(core.clone(), rx, FailurePolicy::Abandon, &child));
                let writer = EventWriter::new(core, queue);
                handles.push(self.spawn_writer(writer.run(events, child)));
            }
            WriterMode::Exchange => {
                let bus = collab.exchange.as_ref().ok_or_else(|| CoreError::Config {
                    message: "exchange writer needs an exchange bus".into(),
                })?;
                let writer = ExchangeWriter::new(core, Arc::clone(bus), child);
                for device in root_devices(&index, collab.repository.as_ref(), config.connector) {
                    writer.connect(device, Arc::clone(&collab.client)).await;
                }
                *self.inner.exchange.lock().await = Some(writer);
            }
        }
        Ok(())
    }

    /// Stop every task of the current connection, invalidate the indexed
    /// property states and drop the index.
    pub async fn disconnect(&self) {
        self.inner.cancel_child.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "connector task panicked");
            }
        }
        drop(handles);

        if let Some(writer) = self.inner.exchange.lock().await.take() {
            writer.shutdown().await;
        }

        let index = self
            .inner
            .index
            .swap(Arc::new(PropertyIndex::empty(self.id())));
        self.invalidate(&index).await;

        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        debug!(connector = %self.id(), "disconnected");
    }

    async fn invalidate(&self, index: &PropertyIndex) {
        let states = &self.inner.collaborators.states;
        for target in index.iter() {
            match states.read(target.property).await {
                Ok(Some(_)) => {
                    if let Err(e) = states
                        .update(target.property, StateUpdate::invalidated())
                        .await
                    {
                        warn!(
                            property = %target.property,
                            error = %e,
                            "failed to invalidate property"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(property = %target.property, error = %e, "failed to invalidate property");
                }
            }
        }
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Index of the current connection. Empty while disconnected.
    pub fn index(&self) -> Arc<PropertyIndex> {
        self.inner.index.load_full()
    }

    /// The cross-process writer, when connected in exchange mode.
    pub async fn exchange(&self) -> Option<ExchangeWriter> {
        self.inner.exchange.lock().await.clone()
    }

    // ── Task spawning ────────────────────────────────────────────────

    fn spawn_dispatch(
        &self,
        core: Reconciler,
        rx: WriteQueueReceiver,
        policy: FailurePolicy,
        cancel: &CancellationToken,
    ) -> JoinHandle<()> {
        let client = Arc::clone(&self.inner.collaborators.client);
        tokio::spawn(dispatch_task(core, client, rx, policy, cancel.clone()))
    }

    /// Spawn a writer loop. A fatal error moves the connector to
    /// [`ConnectionState::Failed`].
    fn spawn_writer<F>(&self, writer: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let connector = self.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.await {
                error!(connector = %connector.id(), error = %e, "writer stopped");
                connector
                    .inner
                    .connection_state
                    .send_replace(ConnectionState::Failed);
            }
        })
    }
}

/// Devices of the index that have no parent inside the connector. Each
/// of them gets the connector's protocol client in exchange mode.
fn root_devices(
    index: &PropertyIndex,
    repository: &dyn ConfigurationRepository,
    connector: ConnectorId,
) -> Vec<DeviceId> {
    index
        .device_ids()
        .filter(|id| {
            repository
                .find_device(connector, *id)
                .and_then(|d| d.parent)
                .is_none_or(|parent| repository.find_device(connector, parent).is_none())
        })
        .collect()
}

// ── Dispatch task ────────────────────────────────────────────────────

async fn dispatch_task(
    core: Reconciler,
    client: Arc<dyn ProtocolClient>,
    mut rx: WriteQueueReceiver,
    policy: FailurePolicy,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.next() => {
                let Some(command) = command else { break };
                match client.send(&command).await {
                    Ok(()) => {
                        debug!(
                            device = %command.device(),
                            property = %command.property(),
                            "write transmitted"
                        );
                    }
                    Err(e) => match policy {
                        FailurePolicy::Retry => warn!(
                            connector = %command.connector(),
                            device = %command.device(),
                            property = %command.property(),
                            error = %e,
                            "write failed, will retry once stale"
                        ),
                        FailurePolicy::Abandon => core.abandon(&command, &e).await,
                    },
                }
            }
        }
    }
    debug!(connector = %core.connector(), "dispatch task stopped");
}
