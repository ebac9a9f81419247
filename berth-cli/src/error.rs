//! CLI-specific error types and exit code mapping

use berth_core::BerthError;

/// CLI-specific error type.
///
/// `exit_code()` maps each variant to the process exit status.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration or stages file problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, signal handler, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped error from the harness or one of its crates.
    #[error("{0}")]
    Core(#[from] BerthError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                 |
    /// |------|-------------------------|
    /// | 0    | Success                 |
    /// | 1    | General / command error |
    /// | 2    | Configuration error     |
    /// | 10   | IO error                |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Core(BerthError::Config(_)) => 2,
            Self::Io(_) | Self::Core(BerthError::Io(_)) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}
