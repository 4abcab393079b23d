//! CLI configuration handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use stratum_migrate::{DEFAULT_VERSION_TABLE, MigrationConfig};

use crate::cli::GlobalArgs;
use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "stratum.toml";

/// Default revision scripts directory (relative to project root)
pub const MIGRATIONS_DIR: &str = "migrations";

/// Contents of `stratum.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Migration configuration
    pub migrations: MigrationsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> CliResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Schema for the version table and unqualified objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// Migration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory holding one subdirectory per revision
    pub directory: PathBuf,

    /// Version table name
    pub version_table: String,

    /// Commit each revision separately
    pub transaction_per_step: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(MIGRATIONS_DIR),
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            transaction_per_step: true,
        }
    }
}

/// The configuration file merged with command-line overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database URL, if any source provided one
    pub url: Option<String>,
    /// Schema qualifier
    pub schema: Option<String>,
    /// Scripts directory, resolved against the config file location
    pub directory: PathBuf,
    /// Version table name
    pub version_table: String,
    /// Commit each revision separately
    pub transaction_per_step: bool,
}

impl Settings {
    /// Resolve settings from the global arguments.
    pub fn resolve(args: &GlobalArgs) -> CliResult<Self> {
        let config = Config::load_or_default(&args.config)?;
        let base = args
            .config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::merge(config, args, &base))
    }

    fn merge(config: Config, args: &GlobalArgs, base: &Path) -> Self {
        let directory = match &args.dir {
            Some(dir) => dir.clone(),
            None if config.migrations.directory.is_relative() => {
                base.join(&config.migrations.directory)
            }
            None => config.migrations.directory.clone(),
        };

        Self {
            url: args.url.clone().or(config.database.url),
            schema: args.schema.clone().or(config.database.schema),
            directory,
            version_table: config.migrations.version_table,
            transaction_per_step: config.migrations.transaction_per_step,
        }
    }

    /// The database URL, or an error naming the ways to provide one.
    pub fn database_url(&self) -> CliResult<&str> {
        self.url.as_deref().ok_or_else(|| {
            CliError::Config(format!(
                "no database URL configured; pass --url, set STRATUM_DATABASE_URL or add [database] url to {}",
                CONFIG_FILE_NAME
            ))
        })
    }

    /// Runner configuration for these settings.
    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig::new()
            .scripts_dir(&self.directory)
            .version_table(&self.version_table)
            .schema(self.schema.clone())
            .transaction_per_step(self.transaction_per_step)
    }
}
