//! `berth config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use berth_core::BerthConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Sections accepted by `config show --section`.
const SECTIONS: [&str; 8] = [
    "general",
    "retry",
    "health",
    "network",
    "database",
    "application",
    "provision",
    "cleanup",
];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => execute_validate(config_path, writer).await,
        ConfigAction::Show { section } => execute_show(config_path, section, writer).await,
    }
}

/// Load, override and validate the configuration file, then report.
///
/// A missing license is only a warning here: it is checked again before
/// `up` creates anything.
///
/// # Errors
///
/// Returns `CliError::Config` when the file is missing, malformed or invalid.
async fn execute_validate(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    info!(path = %config_path.display(), "validating configuration");

    let report = validation_report(config_path, BerthConfig::load(config_path).await);
    writer.render(&report)?;

    if !report.valid {
        return Err(CliError::Config("configuration is invalid".to_owned()));
    }
    Ok(())
}

fn validation_report(
    config_path: &Path,
    loaded: Result<BerthConfig, berth_core::BerthError>,
) -> ConfigValidationReport {
    let source = config_path.display().to_string();
    match loaded {
        Ok(config) => ConfigValidationReport {
            source,
            valid: true,
            errors: Vec::new(),
            warnings: config
                .application
                .require_license()
                .err()
                .map(|e| e.to_string())
                .into_iter()
                .collect(),
        },
        Err(e) => ConfigValidationReport {
            source,
            valid: false,
            errors: vec![e.to_string()],
            warnings: Vec::new(),
        },
    }
}

/// Show the effective configuration with secrets redacted.
///
/// # Errors
///
/// Returns `CliError::Core` if loading fails or `CliError::Command` for an
/// unknown section name.
async fn execute_show(
    config_path: &Path,
    section: Option<String>,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    info!(path = %config_path.display(), "loading configuration");

    let config = BerthConfig::load(config_path).await?.redacted();
    let report = config_report(config_path, &config, section)?;
    writer.render(&report)
}

fn config_report(
    config_path: &Path,
    config: &BerthConfig,
    section: Option<String>,
) -> Result<ConfigReport, CliError> {
    let value = toml::Value::try_from(config)
        .map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))?;

    let selected = match section.as_deref() {
        None => value.clone(),
        Some(name) if SECTIONS.contains(&name) => value
            .get(name)
            .cloned()
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new())),
        Some(name) => {
            return Err(CliError::Command(format!(
                "unknown section: {} (expected: {})",
                name,
                SECTIONS.join(", ")
            )));
        }
    };

    let config_toml = toml::to_string_pretty(&selected)
        .map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))?;

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section,
        config: selected,
        config_toml,
    })
}

/// Configuration display report.
#[derive(Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Effective values (JSON output)
    pub config: toml::Value,
    /// Same values rendered as TOML (text output)
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        match self.section {
            Some(ref section) => writeln!(
                w,
                "Configuration {} (source: {})",
                format!("[{section}]").bold(),
                self.source
            )?,
            None => writeln!(w, "Configuration (source: {})", self.source.bold())?,
        }
        writeln!(w)?;
        write!(w, "{}", self.config_toml)
    }
}

/// Configuration validation report.
#[derive(Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    pub errors: Vec<String>,
    /// Problems that only matter once a stack is arranged
    pub warnings: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if self.valid {
            writeln!(w, "  Result: {}", "VALID".green().bold())?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
        }
        for err in &self.errors {
            writeln!(w, "  Error: {}", err.red())?;
        }
        for warning in &self.warnings {
            writeln!(w, "  Warning: {}", warning.yellow())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::BerthError;
    use berth_core::ConfigError;

    fn render(report: &impl Render) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        report
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    fn licensed() -> BerthConfig {
        let mut config = BerthConfig::default();
        config.application.license = "bGljZW5zZQ==".to_owned();
        config
    }

    #[test]
    fn test_config_report_full() {
        let report = config_report(Path::new("berth.toml"), &licensed().redacted(), None)
            .expect("report should build");

        assert!(report.section.is_none());
        assert!(report.config_toml.contains("[retry]"));
        assert!(report.config_toml.contains("[provision]"));
        assert!(
            !report.config_toml.contains("bGljZW5zZQ=="),
            "license must be redacted"
        );
    }

    #[test]
    fn test_config_report_single_section() {
        let report = config_report(
            Path::new("berth.toml"),
            &BerthConfig::default(),
            Some("retry".to_owned()),
        )
        .expect("report should build");

        assert!(report.config_toml.contains("attempts = 3"));
        assert!(!report.config_toml.contains("[database]"));

        let output = render(&report);
        assert!(output.contains("[retry]"), "should show section name");
        assert!(output.contains("berth.toml"));
    }

    #[test]
    fn test_config_report_unknown_section() {
        let result = config_report(
            Path::new("berth.toml"),
            &BerthConfig::default(),
            Some("ebpf".to_owned()),
        );
        match result {
            Err(CliError::Command(msg)) => {
                assert!(msg.contains("unknown section: ebpf"));
                assert!(msg.contains("provision"));
            }
            _ => panic!("expected Command error"),
        }
    }

    #[test]
    fn test_config_report_json_carries_values_not_text() {
        let report = config_report(
            Path::new("berth.toml"),
            &BerthConfig::default(),
            Some("general".to_owned()),
        )
        .expect("report should build");

        let json = serde_json::to_value(&report).expect("JSON serialization should succeed");
        assert_eq!(json["section"], "general");
        assert_eq!(json["config"]["log_level"], "info");
        assert!(json.get("config_toml").is_none(), "config_toml is text-only");
    }

    #[test]
    fn test_validation_report_valid_with_license() {
        let report = validation_report(Path::new("berth.toml"), Ok(licensed()));
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert!(render(&report).contains("VALID"));
    }

    #[test]
    fn test_validation_report_warns_without_license() {
        let report = validation_report(Path::new("berth.toml"), Ok(BerthConfig::default()));
        assert!(report.valid, "a missing license does not invalidate the file");
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("LICENSE"));
    }

    #[test]
    fn test_validation_report_invalid() {
        let err = BerthError::Config(ConfigError::ParseFailed {
            reason: "expected `]`".to_owned(),
        });
        let report = validation_report(Path::new("bad.toml"), Err(err));

        assert!(!report.valid);
        let output = render(&report);
        assert!(output.contains("INVALID"));
        assert!(output.contains("expected `]`"));
    }
}
