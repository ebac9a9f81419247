//! `berth up` command handler

use std::io::Write;

use serde::Serialize;
use tracing::{info, warn};

use berth_core::{BerthConfig, BerthError};
use berth_harness::{Orchestrator, TestContext};

use crate::cli::UpArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::stages;

/// Execute the `up` command.
///
/// Arranges and provisions a stack, prints its summary and keeps it alive
/// until SIGINT/SIGTERM. Signal handlers are installed before anything is
/// created: a signal during arrangement cancels it and waits for whatever
/// was already built to be removed.
pub async fn execute(
    args: UpArgs,
    config: BerthConfig,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let stages = match args.stages {
        Some(ref path) => stages::load(path).await?,
        None => Vec::new(),
    };
    config.application.require_license().map_err(BerthError::from)?;
    let mut shutdown = ShutdownSignal::install()?;
    info!(stages = stages.len(), "arranging environment");

    let orchestrator = Orchestrator::connect(config)?.with_stages(stages);
    let environment = match until_signal(orchestrator.arrange(), shutdown.recv()).await {
        Interruptible::Done(arranged) => arranged?,
        Interruptible::Interrupted(received) => {
            match &received {
                Ok(signal) => info!(signal = *signal, "shutdown signal received while arranging"),
                Err(e) => warn!(error = %e, "waiting for shutdown signal failed while arranging"),
            }
            orchestrator.wait_for_background_teardown().await;
            let signal = received?;
            return Err(CliError::Command(format!(
                "interrupted by {signal} before the environment was ready"
            )));
        }
    };

    let rendered = writer.render(&StackSummary::from(environment.context()));
    let waited = match rendered {
        Ok(()) => shutdown.recv().await.map_err(CliError::from),
        Err(e) => Err(e),
    };
    if let Ok(signal) = &waited {
        info!(signal = *signal, "shutdown signal received, tearing down");
    }

    let failures = environment.release().await;
    waited?;
    if !failures.is_empty() {
        for failure in &failures {
            warn!(error = %failure, "cleanup failure");
        }
        return Err(CliError::Command(format!(
            "teardown finished with {} cleanup failure(s)",
            failures.len()
        )));
    }
    Ok(())
}

/// Result of racing a unit of work against a shutdown signal.
enum Interruptible<T> {
    Done(T),
    Interrupted(std::io::Result<&'static str>),
}

/// Drive `work` until it finishes or `signal` fires. When the signal wins,
/// `work` is dropped unfinished.
async fn until_signal<T>(
    work: impl Future<Output = T>,
    signal: impl Future<Output = std::io::Result<&'static str>>,
) -> Interruptible<T> {
    tokio::select! {
        done = work => Interruptible::Done(done),
        received = signal => Interruptible::Interrupted(received),
    }
}

#[cfg(unix)]
struct ShutdownSignal {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignal {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> std::io::Result<&'static str> {
        Ok(tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        })
    }
}

#[cfg(not(unix))]
struct ShutdownSignal;

#[cfg(not(unix))]
impl ShutdownSignal {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// What `up` prints once the environment is ready.
#[derive(Debug, Serialize)]
pub struct StackSummary {
    pub network: String,
    pub database_container_id: String,
    pub database_address: String,
    pub application_container_id: String,
    pub application_uri: String,
    pub workspace: String,
}

impl From<&TestContext> for StackSummary {
    fn from(ctx: &TestContext) -> Self {
        let stack = &ctx.stack;
        Self {
            network: stack.network.clone(),
            database_container_id: stack.database_container_id.clone(),
            database_address: format!("{}:{}", stack.database_ip, stack.database_port),
            application_container_id: stack.application_container_id.clone(),
            application_uri: stack.application_uri.clone(),
            workspace: ctx.target.to_string(),
        }
    }
}

impl Render for StackSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "{}", "Environment ready".green().bold())?;
        writeln!(w, "  Network:     {}", self.network)?;
        writeln!(
            w,
            "  Database:    {} ({})",
            self.database_address,
            short_id(&self.database_container_id)
        )?;
        writeln!(
            w,
            "  Application: {} ({})",
            self.application_uri.bold(),
            short_id(&self.application_container_id)
        )?;
        writeln!(w, "  Workspace:   {}", self.workspace)?;
        writeln!(w)?;
        writeln!(w, "Press Ctrl-C to tear down.")
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
