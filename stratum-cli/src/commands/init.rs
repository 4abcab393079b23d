//! `stratum init` command - Create a configuration file and scripts directory.

use crate::cli::{GlobalArgs, InitArgs};
use crate::config::{CONFIG_FILE_NAME, Config};
use crate::error::{CliError, CliResult};
use crate::output::{self, success};

use stratum_migrate::ScriptRepository;

/// Run the init command
pub async fn run(global: &GlobalArgs, args: InitArgs) -> CliResult<()> {
    output::header("Initialize Stratum");

    let config_path = &global.config;
    if config_path.exists() && !args.force {
        return Err(CliError::Command(format!(
            "{} already exists; pass --force to overwrite it",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.database.url = global.url.clone();
    config.database.schema = global.schema.clone();
    config.migrations.directory = global.dir.clone().unwrap_or(args.directory);

    let scripts_dir = config_path
        .parent()
        .map(|p| p.join(&config.migrations.directory))
        .unwrap_or_else(|| config.migrations.directory.clone());
    ScriptRepository::new(&scripts_dir).ensure_dir().await?;
    config.save(config_path)?;

    output::kv("Config", &config_path.display().to_string());
    output::kv("Scripts", &scripts_dir.display().to_string());
    output::newline();
    success(&format!("Created {}", CONFIG_FILE_NAME));

    output::newline();
    output::section("Next steps");
    if config.database.url.is_none() {
        output::list_item(&format!("Set [database] url in {}", CONFIG_FILE_NAME));
    }
    output::list_item("Run `stratum revision -m \"create tables\"` to add the first revision");

    Ok(())
}
