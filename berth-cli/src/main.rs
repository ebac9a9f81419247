//! `berth` binary entry point.
//!
//! Parses arguments, installs logging, dispatches to a command handler and
//! maps the result to an exit code.

mod cli;
mod commands;
mod error;
mod output;
mod stages;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use berth_core::BerthConfig;
use berth_core::config::GeneralConfig;
use berth_harness::init_tracing;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli).await {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }

    let writer = OutputWriter::new(cli.output);
    match run(cli, &writer).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Logging uses the file's `[general]` section when it loads, else defaults,
/// then environment overrides and `--log-level`.
///
/// `config validate` must still be able to report a broken file, so a load
/// failure here is not an error.
async fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let mut config = BerthConfig::from_file(&cli.config)
        .await
        .unwrap_or_default();
    config.apply_env_overrides();

    let mut general: GeneralConfig = config.general;
    if let Some(level) = &cli.log_level {
        general.log_level = level.clone();
    }
    init_tracing(&general).context("failed to initialize logging")
}

async fn run(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    tracing::debug!(config = %cli.config.display(), "berth starting");

    match cli.command {
        Commands::Up(ref args) => {
            let config = load_config(&cli).await?;
            commands::up::execute(args.clone(), config, writer).await
        }
        Commands::Config(args) => commands::config::execute(args, &cli.config, writer).await,
    }
}

/// Load `berth.toml` when present, otherwise defaults plus environment.
async fn load_config(cli: &Cli) -> Result<BerthConfig, CliError> {
    let config = if tokio::fs::try_exists(&cli.config).await? {
        BerthConfig::load(&cli.config).await?
    } else {
        tracing::info!(path = %cli.config.display(), "config file not found, using defaults");
        BerthConfig::from_env()?
    };
    Ok(config)
}
