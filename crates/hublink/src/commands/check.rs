//! `hublink check`: validate configuration and show what would be written.

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use hublink_core::{ConfigurationRepository, Pending, PropertyIndex, PropertyRef};

use super::Loaded;
use crate::cli::{CheckArgs, OutputFormat};
use crate::error::CliError;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled, Serialize)]
struct IndexRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Property")]
    property: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Pending")]
    pending: String,
}

fn row(target: &PropertyRef, loaded: &Loaded) -> IndexRow {
    let repo = &loaded.repository;
    let device = repo
        .find_device(loaded.config.connector, target.device)
        .map_or_else(|| target.device.to_string(), |d| d.label().to_owned());
    let channel = target
        .channel
        .and_then(|c| repo.find_channel(c))
        .map(|c| c.identifier)
        .unwrap_or_default();
    let property = repo.find_property(target.property);
    let state = loaded.states.get(target.property).unwrap_or_default();

    IndexRow {
        device,
        channel,
        property: property
            .as_ref()
            .map_or_else(|| target.property.to_string(), |p| p.identifier.clone()),
        kind: property.map(|p| p.kind.tag().to_string()).unwrap_or_default(),
        expected: state
            .expected_value
            .map(|v| v.to_string())
            .unwrap_or_default(),
        pending: match state.pending {
            Pending::Idle => "-".into(),
            Pending::Requested => "requested".into(),
            Pending::DispatchedAt(at) => format!("dispatched {}", at.to_rfc3339()),
        },
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &CheckArgs, loaded: &Loaded) -> Result<(), CliError> {
    let index = PropertyIndex::build(loaded.config.connector, loaded.repository.as_ref());
    let rows: Vec<IndexRow> = index.iter().map(|target| row(target, loaded)).collect();

    let rendered = match args.output {
        OutputFormat::Table => Table::new(&rows).with(Style::rounded()).to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(&rows)?,
    };
    println!("{rendered}");

    tracing::info!(
        connector = %loaded.config.connector,
        writer = %loaded.config.writer,
        devices = index.device_count(),
        properties = index.len(),
        "configuration valid"
    );
    Ok(())
}
