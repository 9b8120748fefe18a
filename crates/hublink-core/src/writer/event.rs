// ── Event-triggered writer ──
//
// Reacts to state notifications instead of scanning. A notification only
// produces writes for candidates whose state is freshly requested, so the
// dispatch stamp it writes back cannot trigger another write.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Eligibility, LoopClock, Reconciler};
use crate::command::WriteQueue;
use crate::error::CoreError;
use crate::store::PropertyStateEvent;

pub struct EventWriter {
    core: Reconciler,
    queue: WriteQueue,
}

impl EventWriter {
    pub fn new(core: Reconciler, queue: WriteQueue) -> Self {
        Self { core, queue }
    }

    /// Handle one notification. Returns how many commands were enqueued.
    pub async fn handle(
        &self,
        event: &PropertyStateEvent,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let mut enqueued = 0;

        for target in self.core.resolve_candidates(event.property) {
            // The notification may lag behind the store; act on what it
            // holds now.
            let Some(state) = self.core.read_state(&target).await else {
                continue;
            };
            let Some(command) = self
                .core
                .on_candidate(&target, &state, now, Eligibility::Immediate)
            else {
                continue;
            };

            if !self.core.mark_dispatched(&command).await {
                continue;
            }
            self.queue.append(command)?;
            debug!(
                connector = %self.core.connector(),
                device = %target.device,
                property = %target.property,
                action = ?event.action,
                "write enqueued from notification"
            );
            enqueued += 1;
        }

        Ok(enqueued)
    }

    /// Consume notifications until `cancel` fires or the source closes.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<PropertyStateEvent>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        info!(connector = %self.core.connector(), "event writer started");
        let clock = LoopClock::start();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = events.recv() => match result {
                    Ok(event) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        self.handle(&event, clock.now()).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event writer lagged, notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("state notification source closed");
                        break;
                    }
                },
            }
        }

        debug!(connector = %self.core.connector(), "event writer stopped");
        Ok(())
    }
}
