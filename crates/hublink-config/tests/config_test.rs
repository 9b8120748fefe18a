#![allow(clippy::unwrap_used)]
// Integration tests for settings loading and catalog seeding.

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use hublink_config::{ConfigError, LogFormat, Settings, load_catalog, load_settings};
use hublink_core::{
    ConfigurationRepository, MemoryRepository, MemoryStateStore, Pending, PropertyIndex,
    PropertyKind, PropertyValue, WriterMode,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn file_with(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const CATALOG: &str = r#"
[[connectors]]
id = "7b0c2a34-53f4-4a7e-9d55-0d5e5c1f1b11"
identifier = "knx-main"
name = "KNX main line"

[[connectors.devices]]
identifier = "gateway"

[[connectors.devices]]
identifier = "thermostat"
parent = "gateway"

[[connectors.devices.properties]]
identifier = "setpoint"
data_type = "float"
settable = true
queryable = true
actual = 19.5
expected = 21.5

[[connectors.devices.channels]]
identifier = "display"

[[connectors.devices.channels.properties]]
identifier = "setpoint-mirror"
kind = "mapped"
parent = "thermostat/setpoint"
data_type = "float"

[[connectors.devices.channels.properties]]
identifier = "unit"
kind = "variable"
data_type = "string"
value = "celsius"
"#;

// ── Settings ────────────────────────────────────────────────────────

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = load_settings(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(settings.timing, Settings::default().timing);
    assert_eq!(settings.logging.format, LogFormat::Text);
}

#[test]
fn test_file_values_override_defaults() {
    let file = file_with(
        r#"
        [connector]
        id = "7b0c2a34-53f4-4a7e-9d55-0d5e5c1f1b11"
        writer = "event"
        catalog = "/etc/hublink/catalog.toml"

        [timing]
        tick_ms = 25
        debounce_ms = 1000

        [logging]
        format = "json"
        "#,
    );

    let settings = load_settings(Some(file.path())).unwrap();
    assert_eq!(settings.connector.writer, WriterMode::Event);
    assert_eq!(
        settings.connector.id.unwrap().to_string(),
        "7b0c2a34-53f4-4a7e-9d55-0d5e5c1f1b11"
    );
    assert_eq!(settings.timing.tick_ms, 25);
    assert_eq!(settings.timing.debounce_ms, 1000);
    assert_eq!(settings.timing.stale_dispatch_ms, 2000);
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn test_unknown_writer_is_a_load_error() {
    let file = file_with("[connector]\nwriter = \"telepathy\"\n");
    assert!(matches!(
        load_settings(Some(file.path())),
        Err(ConfigError::Figment(_))
    ));
}

// ── Catalog ─────────────────────────────────────────────────────────

#[test]
fn test_catalog_populates_repository_and_states() {
    let file = file_with(CATALOG);
    let catalog = load_catalog(file.path()).unwrap();

    let repo = MemoryRepository::new();
    let states = MemoryStateStore::new();
    let ids = catalog.populate(&repo, &states).unwrap();
    assert_eq!(ids.len(), 1);
    let connector = ids[0];
    assert_eq!(connector.to_string(), "7b0c2a34-53f4-4a7e-9d55-0d5e5c1f1b11");

    let devices = repo.find_devices(connector);
    assert_eq!(
        devices.iter().map(|d| d.identifier.as_str()).collect::<Vec<_>>(),
        vec!["gateway", "thermostat"]
    );
    assert_eq!(devices[1].parent, Some(devices[0].id));
    assert_eq!(repo.property_count(), 3);

    // Setpoint plus its mapped mirror; the variable stays out.
    let index = PropertyIndex::build(connector, &repo);
    assert_eq!(index.len(), 2);

    let setpoint = index.properties(devices[1].id).next().unwrap().property;
    let state = states.get(setpoint).unwrap();
    assert_eq!(state.actual_value, Some(PropertyValue::Float(19.5)));
    assert_eq!(state.expected_value, Some(PropertyValue::Float(21.5)));
    assert_eq!(state.pending, Pending::Requested);
    assert!(state.valid);

    let mirror = index.properties(devices[1].id).nth(1).unwrap().property;
    assert_eq!(
        repo.find_property(mirror).unwrap().kind,
        PropertyKind::Mapped { parent: setpoint }
    );
}

#[test]
fn test_unknown_parent_path_is_rejected() {
    let catalog = hublink_config::Catalog::parse(
        r#"
        [[connectors]]
        identifier = "zigbee"

        [[connectors.devices]]
        identifier = "bulb"

        [[connectors.devices.properties]]
        identifier = "brightness-mirror"
        kind = "mapped"
        parent = "bulb/brightness"
        "#,
    )
    .unwrap();

    let err = catalog
        .populate(&MemoryRepository::new(), &MemoryStateStore::new())
        .unwrap_err();
    assert!(err.to_string().contains("bulb/brightness"));
}

#[test]
fn test_missing_catalog_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_catalog(&dir.path().join("nope.toml")),
        Err(ConfigError::Io(_))
    ));
}
