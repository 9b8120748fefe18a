//! Settings and device catalog for the `hublink` binary.
//!
//! Settings are layered with figment: built-in defaults, then the TOML
//! config file, then `HUBLINK_` environment variables (`__` separates
//! sections, e.g. `HUBLINK_TIMING__TICK_MS=20`). The result translates
//! into a `hublink_core::ConnectorConfig`.
//!
//! The [`catalog`] describes connectors, devices, channels and properties
//! in TOML and seeds the in-memory stores of the core.

pub mod catalog;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hublink_core::{ConnectorConfig, ConnectorId, WriterMode, WriterTiming};

pub use catalog::{Catalog, load_catalog};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to parse catalog: {0}")]
    Catalog(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub connector: ConnectorSection,

    #[serde(default)]
    pub timing: TimingSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectorSection {
    /// Connector to run. Defaults to the first connector of the catalog.
    pub id: Option<ConnectorId>,

    /// Active writer: "periodic", "event" or "exchange".
    #[serde(default)]
    pub writer: WriterMode,

    /// Path of the device catalog.
    pub catalog: Option<PathBuf>,
}

/// Scheduler timing in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimingSection {
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_stale_dispatch_ms")]
    pub stale_dispatch_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            start_delay_ms: default_start_delay_ms(),
            tick_ms: default_tick_ms(),
            debounce_ms: default_debounce_ms(),
            stale_dispatch_ms: default_stale_dispatch_ms(),
        }
    }
}

fn default_start_delay_ms() -> u64 {
    5_000
}
fn default_tick_ms() -> u64 {
    10
}
fn default_debounce_ms() -> u64 {
    2_500
}
fn default_stale_dispatch_ms() -> u64 {
    2_000
}

impl TimingSection {
    pub fn to_timing(&self) -> WriterTiming {
        WriterTiming {
            start_delay: Duration::from_millis(self.start_delay_ms),
            tick: Duration::from_millis(self.tick_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            stale_dispatch: Duration::from_millis(self.stale_dispatch_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
}

impl Settings {
    /// Validated runtime configuration for `connector`.
    pub fn connector_config(&self, connector: ConnectorId) -> Result<ConnectorConfig, ConfigError> {
        let timing = self.timing.to_timing();
        timing.validate().map_err(|e| ConfigError::Validation {
            field: "timing".into(),
            reason: e.to_string(),
        })?;
        Ok(ConnectorConfig::new(connector)
            .with_writer(self.connector.writer)
            .with_timing(timing))
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "hublink", "hublink").map_or_else(
        || PathBuf::from(".hublink").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from `path` (or the default path) plus environment.
/// A missing file leaves the defaults in place.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("HUBLINK_").split("__"));

    let settings: Settings = figment.extract()?;
    Ok(settings)
}
