// ── Reconciliation scheduler ──
//
// Round-robin scan over the property index. One tick visits devices in
// index order, skipping those already processed in the current pass, and
// stops at the first device that produced a write. Debounce bookkeeping
// lives in `last_attempt` and survives passes; it is dropped with the
// scheduler on disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{Eligibility, LoopClock, Reconciler};
use crate::command::WriteQueue;
use crate::config::WriterTiming;
use crate::error::CoreError;
use crate::index::PropertyIndex;
use crate::model::{DeviceId, PropertyId};

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A command for a property of this device was enqueued.
    Written(DeviceId),
    /// Every device had been processed; the pass was reset.
    PassCompleted,
    /// The remaining devices were visited without writing anything.
    Idle,
}

pub struct Scheduler {
    core: Reconciler,
    index: Arc<PropertyIndex>,
    queue: WriteQueue,
    timing: WriterTiming,
    processed: HashSet<DeviceId>,
    last_attempt: HashMap<PropertyId, DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(
        core: Reconciler,
        index: Arc<PropertyIndex>,
        queue: WriteQueue,
        timing: WriterTiming,
    ) -> Self {
        Self {
            core,
            index,
            queue,
            timing,
            processed: HashSet::new(),
            last_attempt: HashMap::new(),
        }
    }

    /// Devices already visited in the current pass.
    pub fn processed_devices(&self) -> &HashSet<DeviceId> {
        &self.processed
    }

    /// When `property` was last considered for a write.
    pub fn last_attempt(&self, property: PropertyId) -> Option<DateTime<Utc>> {
        self.last_attempt.get(&property).copied()
    }

    /// Run one tick at `now`. Enqueues at most one command.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, CoreError> {
        let remaining: Vec<DeviceId> = self
            .index
            .device_ids()
            .filter(|d| !self.processed.contains(d))
            .collect();

        if remaining.is_empty() {
            self.processed.clear();
            trace!(connector = %self.core.connector(), "scheduler pass completed");
            return Ok(TickOutcome::PassCompleted);
        }

        for device in remaining {
            self.processed.insert(device);
            if self.try_write_device(device, now).await? {
                return Ok(TickOutcome::Written(device));
            }
        }
        Ok(TickOutcome::Idle)
    }

    /// Write the first eligible property of `device`. Returns whether a
    /// command was enqueued.
    pub async fn try_write_device(
        &mut self,
        device: DeviceId,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let debounce = self.timing.debounce_delta();
        let eligibility = Eligibility::Scheduled {
            stale_after: self.timing.stale_delta(),
        };
        let index = Arc::clone(&self.index);

        for target in index.properties(device) {
            let debounced = self
                .last_attempt
                .get(&target.property)
                .is_some_and(|last| now.signed_duration_since(*last) < debounce);
            if debounced {
                continue;
            }
            self.last_attempt.insert(target.property, now);

            let Some(state) = self.core.read_state(target).await else {
                continue;
            };
            let Some(command) = self.core.on_candidate(target, &state, now, eligibility) else {
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
                "write enqueued"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Drive the scheduler until `cancel` fires. Only a closed queue ends
    /// the loop with an error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), CoreError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(self.timing.start_delay) => {}
        }

        info!(
            connector = %self.core.connector(),
            devices = self.index.device_count(),
            properties = self.index.len(),
            "periodic writer started"
        );

        let clock = LoopClock::start();
        let mut interval = tokio::time::interval(self.timing.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.tick(clock.now()).await?;
                }
            }
        }

        debug!(connector = %self.core.connector(), "periodic writer stopped");
        Ok(())
    }
}
