//! Stages file loading for `berth up --stages`.
//!
//! ```toml
//! [[stage]]
//! dir = "provision/space"
//! vars = ["space_name=Integration"]
//! output = "space_id"
//!
//! [[stage]]
//! dir = "provision/projects"
//! ```
//!
//! Relative `dir` values are resolved against the stages file's directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use berth_provision::{ProvisioningStage, Variable};

use crate::error::CliError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StagesFile {
    #[serde(default)]
    stage: Vec<StageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageEntry {
    dir: PathBuf,
    #[serde(default)]
    vars: Vec<String>,
    output: Option<String>,
}

/// Read and parse a stages file.
pub async fn load(path: &Path) -> Result<Vec<ProvisioningStage>, CliError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CliError::Config(format!("stages file not found: {}", path.display()))
        } else {
            CliError::Io(e)
        }
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    parse(&content, base)
}

/// Parse stages TOML, resolving relative directories against `base`.
pub fn parse(content: &str, base: &Path) -> Result<Vec<ProvisioningStage>, CliError> {
    let file: StagesFile = toml::from_str(content)
        .map_err(|e| CliError::Config(format!("failed to parse stages file: {e}")))?;

    file.stage
        .into_iter()
        .enumerate()
        .map(|(index, entry)| entry.into_stage(index + 1, base))
        .collect()
}

impl StageEntry {
    fn into_stage(self, number: usize, base: &Path) -> Result<ProvisioningStage, CliError> {
        if self.dir.as_os_str().is_empty() {
            return Err(CliError::Config(format!("stage {number}: dir must not be empty")));
        }
        let dir = if self.dir.is_absolute() {
            self.dir
        } else {
            base.join(self.dir)
        };

        let vars = self
            .vars
            .iter()
            .map(|raw| {
                Variable::parse(raw).ok_or_else(|| {
                    CliError::Config(format!(
                        "stage {number}: variable '{raw}' is not in name=value form"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut stage = ProvisioningStage::new(dir).vars(vars);
        if let Some(output) = self.output.filter(|o| !o.trim().is_empty()) {
            stage = stage.output(output);
        }
        Ok(stage)
    }
}
