//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no I/O happens here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// berth -- ephemeral test environments for application integration tests.
///
/// Use `berth <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "berth", version, about, long_about = None)]
pub struct Cli {
    /// Path to the berth.toml configuration file.
    #[arg(short, long, default_value = "berth.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Arrange a stack, provision it and keep it up until Ctrl-C.
    Up(UpArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- up ----

#[derive(Args, Debug, Clone)]
pub struct UpArgs {
    /// TOML file listing provisioning stages (`[[stage]]` tables).
    #[arg(long)]
    pub stages: Option<PathBuf>,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only one section (general, retry, health, network, database,
        /// application, provision, cleanup).
        #[arg(long)]
        section: Option<String>,
    },
}
