//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hublink_config::ConfigError;
use hublink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("No device catalog configured")]
    #[diagnostic(
        code(hublink::no_catalog),
        help(
            "Pass --catalog <FILE> or set `catalog` in the [connector] section of\n\
             {path}"
        )
    )]
    NoCatalog { path: String },

    #[error("Catalog defines no connectors")]
    #[diagnostic(
        code(hublink::empty_catalog),
        help("Add at least one [[connectors]] table to the catalog.")
    )]
    EmptyCatalog,

    #[error(transparent)]
    #[diagnostic(code(hublink::config))]
    Config(Box<ConfigError>),

    // ── Resources ────────────────────────────────────────────────────
    #[error("Connector '{identifier}' not found")]
    #[diagnostic(
        code(hublink::connector_not_found),
        help("Run: hublink check  to see the connectors of the catalog")
    )]
    ConnectorNotFound { identifier: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hublink::validation))]
    Validation { field: String, reason: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Write engine failed: {message}")]
    #[diagnostic(
        code(hublink::engine),
        help("Re-run with -vv to see the writer logs.")
    )]
    Engine { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(hublink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCatalog { .. } | Self::EmptyCatalog | Self::Config(_) => exit_code::CONFIG,
            Self::ConnectorNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectorNotFound { id } => Self::ConnectorNotFound {
                identifier: id.to_string(),
            },
            CoreError::Config { message } => Self::Validation {
                field: "connector".into(),
                reason: message,
            },
            other => Self::Engine {
                message: other.to_string(),
            },
        }
    }
}
