// ── Core error types ──
//
// Errors surfaced by the reconciliation engine. Per-property failures are
// contained by the writers and only logged; the variants that escape a
// writer task (queue closed, lifecycle misuse) are fatal for that
// connection.

use thiserror::Error;

use crate::model::{ConnectorId, DeviceId, PropertyId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("Connector not found: {id}")]
    ConnectorNotFound { id: ConnectorId },

    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── State store errors ───────────────────────────────────────────
    #[error("Failed to read state of property {property}: {message}")]
    StateRead { property: PropertyId, message: String },

    #[error("Failed to write state of property {property}: {message}")]
    StateWrite { property: PropertyId, message: String },

    // ── Transmission errors ──────────────────────────────────────────
    #[error("Transmission to device {device} failed for property {property}: {message}")]
    Transmission {
        device: DeviceId,
        property: PropertyId,
        message: String,
    },

    #[error("Write queue consumer is gone")]
    QueueClosed,

    #[error("Invalid state document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Connector {id} is already connected")]
    AlreadyConnected { id: ConnectorId },

    #[error("Connector disconnected")]
    Disconnected,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the error only concerns one property and must not stop
    /// the writer that hit it.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::StateRead { .. }
                | Self::StateWrite { .. }
                | Self::Transmission { .. }
                | Self::InvalidDocument(_)
        )
    }
}
