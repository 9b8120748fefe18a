//! Clap derive structures for the `hublink` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use hublink_core::WriterMode;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hublink -- property write scheduling for IoT connectors
#[derive(Debug, Parser)]
#[command(
    name = "hublink",
    version,
    about = "Reconcile desired property values with connected devices",
    long_about = "Runs the write side of an IoT connector: picks up properties whose\n\
        expected value differs from what the device reports and pushes write\n\
        commands to the protocol client, with debounce and stale-dispatch retry.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "HUBLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Device catalog (overrides [connector] catalog)
    #[arg(long, env = "HUBLINK_CATALOG", global = true)]
    pub catalog: Option<PathBuf>,

    /// Connector id to run (defaults to the first catalog connector)
    #[arg(long, global = true)]
    pub connector: Option<String>,

    /// Log line format (overrides [logging] format)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default)
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect the connector and reconcile writes until interrupted
    Run(RunArgs),

    /// Validate settings and catalog, then print the property index
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Active writer (overrides [connector] writer)
    #[arg(long, short = 'w', value_parser = parse_writer)]
    pub writer: Option<WriterMode>,

    /// Stop after this long instead of waiting for Ctrl-C (e.g. "30s")
    #[arg(long = "for", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Delay before the simulated device reports a written value
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    pub latency: Duration,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,
}

fn parse_writer(value: &str) -> Result<WriterMode, String> {
    value
        .parse()
        .map_err(|_| format!("unknown writer '{value}' (expected periodic, event or exchange)"))
}
