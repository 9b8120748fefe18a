// ── Runtime connector configuration ──
//
// These types describe *how* a connector reconciles property state.
// They never touch disk: the binary (through `hublink-config`) builds a
// `ConnectorConfig` and hands it in.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::model::ConnectorId;

/// Active write strategy of a connector instance. Exactly one runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WriterMode {
    /// Fixed-rate scan with debounce and stale-dispatch retry.
    #[default]
    Periodic,
    /// Immediate writes on in-process state-change notifications.
    Event,
    /// Writes driven by state documents from the cross-process bus.
    Exchange,
}

/// Timing knobs of the reconciliation scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterTiming {
    /// Grace period after connect before the first scan tick.
    pub start_delay: Duration,
    /// Scan period.
    pub tick: Duration,
    /// Minimum spacing between two write attempts for the same property.
    pub debounce: Duration,
    /// Age after which a dispatched but unconfirmed write is resent.
    pub stale_dispatch: Duration,
}

impl Default for WriterTiming {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(5),
            tick: Duration::from_millis(10),
            debounce: Duration::from_millis(2500),
            stale_dispatch: Duration::from_millis(2000),
        }
    }
}

impl WriterTiming {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tick.is_zero() {
            return Err(CoreError::Config {
                message: "tick interval must be greater than zero".into(),
            });
        }
        if self.debounce.is_zero() {
            return Err(CoreError::Config {
                message: "debounce window must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn debounce_delta(&self) -> TimeDelta {
        to_delta(self.debounce)
    }

    pub(crate) fn stale_delta(&self) -> TimeDelta {
        to_delta(self.stale_dispatch)
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Configuration for running a single connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Connector whose devices this instance reconciles.
    pub connector: ConnectorId,
    /// Active write strategy.
    pub writer: WriterMode,
    /// Scheduler timing (only the periodic writer uses all of it).
    pub timing: WriterTiming,
}

impl ConnectorConfig {
    pub fn new(connector: ConnectorId) -> Self {
        Self {
            connector,
            writer: WriterMode::default(),
            timing: WriterTiming::default(),
        }
    }

    pub fn with_writer(mut self, writer: WriterMode) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_timing(mut self, timing: WriterTiming) -> Self {
        self.timing = timing;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_timing_matches_documented_values() {
        let timing = WriterTiming::default();
        assert_eq!(timing.start_delay, Duration::from_secs(5));
        assert_eq!(timing.tick, Duration::from_millis(10));
        assert_eq!(timing.debounce_delta(), TimeDelta::milliseconds(2500));
        assert_eq!(timing.stale_delta(), TimeDelta::milliseconds(2000));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let timing = WriterTiming {
            tick: Duration::ZERO,
            ..WriterTiming::default()
        };
        assert!(matches!(timing.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn writer_mode_parses_snake_case() {
        assert_eq!("exchange".parse::<WriterMode>().unwrap(), WriterMode::Exchange);
        assert_eq!(WriterMode::Periodic.to_string(), "periodic");
    }
}
