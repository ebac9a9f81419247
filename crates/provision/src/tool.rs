//! Provisioning tool abstraction.
//!
//! The pipeline only needs four operations from the external tool, captured by
//! [`ProvisioningTool`]. [`TerraformCli`] runs the real binary as a child
//! process in the stage directory; tests use `MockTool`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use berth_core::config::ProvisionConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::stage::Variable;

/// External provisioning tool operations.
///
/// Every call runs against one stage directory. A non-zero exit status is a
/// failure; stderr is captured in the error.
pub trait ProvisioningTool: Send + Sync + 'static {
    /// Initialises the stage directory. Returns stdout.
    fn init(&self, dir: &Path) -> impl Future<Output = Result<String, ProvisionError>> + Send;

    /// Applies the stage with the given variables, in order. Returns stdout.
    fn apply(
        &self,
        dir: &Path,
        vars: &[Variable],
    ) -> impl Future<Output = Result<String, ProvisionError>> + Send;

    /// Reads a named output from the persisted state.
    fn output(
        &self,
        dir: &Path,
        name: &str,
    ) -> impl Future<Output = Result<serde_json::Value, ProvisionError>> + Send;

    /// Dumps the persisted state.
    fn show_state(
        &self,
        dir: &Path,
    ) -> impl Future<Output = Result<serde_json::Value, ProvisionError>> + Send;
}

/// `terraform` command line driver.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    command_timeout: Option<Duration>,
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            command_timeout: None,
        }
    }

    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self::new(&config.binary).with_command_timeout(config.command_timeout())
    }

    /// Kills any single command that runs longer than `timeout`.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Apply arguments, with each variable rendered as `-var=name=value`.
    pub fn apply_args(vars: &[Variable]) -> Vec<String> {
        let mut args = vec![
            "apply".to_owned(),
            "-auto-approve".to_owned(),
            "-no-color".to_owned(),
        ];
        args.extend(vars.iter().map(|v| format!("-var={v}")));
        args
    }

    async fn run(&self, dir: &Path, args: &[String]) -> Result<Vec<u8>, ProvisionError> {
        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        let command = format!("{} {subcommand}", self.binary.display());
        debug!(command = command.as_str(), dir = %dir.display(), "running provisioning tool");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.output();

        let output = match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, child).await.map_err(|_| {
                ProvisionError::ToolTimeout {
                    command: command.clone(),
                    dir: dir.display().to_string(),
                    timeout: limit,
                }
            })?,
            None => child.await,
        }
        .map_err(|e| ProvisionError::ToolLaunch {
            command: command.clone(),
            reason: e.to_string(),
        })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            warn!(
                command = command.as_str(),
                dir = %dir.display(),
                code = ?output.status.code(),
                stderr = stderr.as_str(),
                "provisioning tool failed"
            );
            Err(ProvisionError::ToolFailed {
                command,
                dir: dir.display().to_string(),
                code: output.status.code(),
                stderr,
            })
        }
    }

    async fn run_json(
        &self,
        dir: &Path,
        args: &[String],
        name: &str,
    ) -> Result<serde_json::Value, ProvisionError> {
        let stdout = self.run(dir, args).await?;
        serde_json::from_slice(&stdout).map_err(|e| ProvisionError::OutputMissing {
            dir: dir.display().to_string(),
            name: name.to_owned(),
            reason: format!("invalid JSON: {e}"),
        })
    }
}

fn logged_stdout(command: &str, dir: &Path, stdout: &[u8]) -> String {
    let text = String::from_utf8_lossy(stdout).into_owned();
    debug!(
        command,
        dir = %dir.display(),
        stdout = text.trim_end(),
        "provisioning tool output"
    );
    text
}

impl ProvisioningTool for TerraformCli {
    async fn init(&self, dir: &Path) -> Result<String, ProvisionError> {
        let args = ["init".to_owned(), "-no-color".to_owned()];
        let stdout = self.run(dir, &args).await?;
        Ok(logged_stdout("init", dir, &stdout))
    }

    async fn apply(&self, dir: &Path, vars: &[Variable]) -> Result<String, ProvisionError> {
        let stdout = self.run(dir, &Self::apply_args(vars)).await?;
        Ok(logged_stdout("apply", dir, &stdout))
    }

    async fn output(&self, dir: &Path, name: &str) -> Result<serde_json::Value, ProvisionError> {
        // `output -raw` can exit 0 on errors, so always ask for JSON
        let args = ["output".to_owned(), "-json".to_owned(), name.to_owned()];
        self.run_json(dir, &args, name)
            .await
            .map_err(|e| match e {
                ProvisionError::ToolFailed { stderr, .. } => ProvisionError::OutputMissing {
                    dir: dir.display().to_string(),
                    name: name.to_owned(),
                    reason: stderr,
                },
                other => other,
            })
    }

    async fn show_state(&self, dir: &Path) -> Result<serde_json::Value, ProvisionError> {
        let args = ["show".to_owned(), "-json".to_owned()];
        self.run_json(dir, &args, "state").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_args_keep_variable_order() {
        let args = TerraformCli::apply_args(&[
            Variable::new("octopus_server", "http://localhost:8080"),
            Variable::new("octopus_space_id", "Spaces-2"),
        ]);
        assert_eq!(
            args,
            vec![
                "apply",
                "-auto-approve",
                "-no-color",
                "-var=octopus_server=http://localhost:8080",
                "-var=octopus_space_id=Spaces-2",
            ]
        );
    }

    #[test]
    fn from_config_uses_binary_and_timeout() {
        let config = ProvisionConfig {
            binary: "/usr/local/bin/terraform".to_owned(),
            command_timeout_secs: Some(30),
            ..Default::default()
        };
        let cli = TerraformCli::from_config(&config);
        assert_eq!(cli.binary, PathBuf::from("/usr/local/bin/terraform"));
        assert_eq!(cli.command_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new("/nonexistent/terraform");
        let err = cli.init(dir.path()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ToolLaunch { .. }));
    }
}
