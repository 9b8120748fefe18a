//! Command handlers.

pub mod check;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use hublink_config::{Settings, config_path, load_catalog};
use hublink_core::{ConnectorConfig, ConnectorId, MemoryRepository, MemoryStateStore};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(
    command: Command,
    global: &GlobalOpts,
    settings: &Settings,
) -> Result<(), CliError> {
    match command {
        Command::Run(args) => {
            let mut settings = settings.clone();
            if let Some(writer) = args.writer {
                settings.connector.writer = writer;
            }
            let loaded = load(global, &settings)?;
            run::handle(&args, loaded).await
        }
        Command::Check(args) => {
            let loaded = load(global, settings)?;
            check::handle(&args, &loaded)
        }
    }
}

// ── Catalog loading ─────────────────────────────────────────────────

/// Stores seeded from the catalog plus the selected connector.
pub struct Loaded {
    pub repository: Arc<MemoryRepository>,
    pub states: Arc<MemoryStateStore>,
    pub config: ConnectorConfig,
}

fn load(global: &GlobalOpts, settings: &Settings) -> Result<Loaded, CliError> {
    let path: PathBuf = global
        .catalog
        .clone()
        .or_else(|| settings.connector.catalog.clone())
        .ok_or_else(|| CliError::NoCatalog {
            path: global
                .config
                .clone()
                .unwrap_or_else(config_path)
                .display()
                .to_string(),
        })?;

    let catalog = load_catalog(&path)?;
    let repository = Arc::new(MemoryRepository::new());
    let states = Arc::new(MemoryStateStore::new());
    let connectors = catalog.populate(&repository, &states)?;

    let connector = select_connector(global, settings, &connectors)?;
    let config = settings.connector_config(connector)?;

    Ok(Loaded {
        repository,
        states,
        config,
    })
}

fn select_connector(
    global: &GlobalOpts,
    settings: &Settings,
    connectors: &[ConnectorId],
) -> Result<ConnectorId, CliError> {
    let requested = match global.connector.as_deref() {
        Some(raw) => Some(raw.parse::<ConnectorId>().map_err(|e| CliError::Validation {
            field: "connector".into(),
            reason: e.to_string(),
        })?),
        None => settings.connector.id,
    };

    match requested {
        Some(id) if connectors.contains(&id) => Ok(id),
        Some(id) => Err(CliError::ConnectorNotFound {
            identifier: id.to_string(),
        }),
        None => connectors.first().copied().ok_or(CliError::EmptyCatalog),
    }
}
