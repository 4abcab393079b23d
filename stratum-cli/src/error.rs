//! CLI error types and result alias.

use miette::Diagnostic;
use stratum_migrate::MigrationError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(stratum::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(stratum::config))]
    Config(String),

    /// Migration engine error
    #[error("{0}")]
    #[diagnostic(code(stratum::migration))]
    Migration(#[from] MigrationError),

    /// Command misuse
    #[error("Command error: {0}")]
    #[diagnostic(code(stratum::command))]
    Command(String),
}

impl CliError {
    /// Remediation line printed under the error.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Migration(err) => match err {
                MigrationError::MultipleHeads { .. } => {
                    Some("run `stratum merge` to join the heads, or name a revision explicitly")
                }
                MigrationError::AmbiguousRevision { .. } => {
                    Some("use a longer revision prefix or one of the listed candidates")
                }
                MigrationError::UnreachableRevision { .. } => {
                    Some("check `stratum current` and `stratum history` for the path between revisions")
                }
                MigrationError::Irreversible(_) => {
                    Some("add a down.sql to the revision or stamp past it with `stratum stamp`")
                }
                MigrationError::ConcurrentMigration(_) => Some(
                    "wait for the other run to finish; if it crashed, clear the lock with `stratum unlock`",
                ),
                MigrationError::BatchOperation { .. } => {
                    Some("no changes were made to the table; adjust the batch and run again")
                }
                MigrationError::Parse { .. } | MigrationError::Graph(_) => {
                    Some("fix the revision scripts; nothing was applied")
                }
                _ => None,
            },
            Self::Config(_) => Some("see `stratum --help` for configuration options"),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}
