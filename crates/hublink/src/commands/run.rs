//! `hublink run`: connect the connector against a simulated transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hublink_core::{
    Collaborators, ConnectionState, Connector, CoreError, ExchangeBus, LocalExchange,
    MemoryStateStore, ProtocolClient, StateNotifications, WriteCommand, WriterMode,
    forward_state_events,
};

use super::Loaded;
use crate::cli::RunArgs;
use crate::error::CliError;

// ── Simulated transport ─────────────────────────────────────────────

/// Stand-in for a vendor transport: accepts every command and reports
/// the written value back after `latency`.
struct SimulatedClient {
    states: Arc<MemoryStateStore>,
    latency: Duration,
    transmitted: AtomicUsize,
}

#[async_trait]
impl ProtocolClient for SimulatedClient {
    async fn send(&self, command: &WriteCommand) -> Result<(), CoreError> {
        let Some(value) = command.value().cloned() else {
            return Err(CoreError::Transmission {
                device: command.device(),
                property: command.property(),
                message: "command carries no value".into(),
            });
        };
        info!(
            device = %command.device(),
            channel = ?command.channel(),
            property = %command.property(),
            value = %value,
            "write transmitted"
        );
        self.transmitted.fetch_add(1, Ordering::Relaxed);

        let states = Arc::clone(&self.states);
        let property = command.property();
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            states.confirm(property, value);
        });
        Ok(())
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: &RunArgs, loaded: Loaded) -> Result<(), CliError> {
    let Loaded {
        repository,
        states,
        config,
    } = loaded;

    let client = Arc::new(SimulatedClient {
        states: Arc::clone(&states),
        latency: args.latency,
        transmitted: AtomicUsize::new(0),
    });

    let exchange: Arc<dyn ExchangeBus> = Arc::new(LocalExchange::new());
    let forwarder_cancel = CancellationToken::new();
    let forwarder = (config.writer == WriterMode::Exchange).then(|| {
        tokio::spawn(forward_state_events(
            states.subscribe(),
            Arc::clone(&exchange),
            forwarder_cancel.clone(),
        ))
    });

    let collaborators = Collaborators::new(repository, states.clone(), client.clone())
        .with_notifications(states.clone())
        .with_exchange(exchange);
    let connector = Connector::new(config, collaborators);
    connector.connect().await?;

    let index = connector.index();
    // Seeded states predate every subscription; replay them once so the
    // notification-driven writers see them too.
    for target in index.iter() {
        if let Some(seeded) = states.get(target.property) {
            states.insert(target.property, seeded);
        }
    }
    info!(
        devices = index.device_count(),
        properties = index.len(),
        "connector running"
    );

    let mut state = connector.connection_state();
    let failed = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        () = sleep_for(args.duration) => false,
        _ = state.wait_for(|s| *s == ConnectionState::Failed) => true,
    };

    connector.disconnect().await;
    forwarder_cancel.cancel();
    if let Some(handle) = forwarder {
        if let Err(e) = handle.await {
            warn!(error = %e, "state forwarder panicked");
        }
    }

    if failed {
        return Err(CliError::Engine {
            message: "writer stopped with a fatal error".into(),
        });
    }

    println!(
        "{} write(s) transmitted",
        client.transmitted.load(Ordering::Relaxed)
    );
    Ok(())
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
