//! Stratum CLI - Command-line interface for Stratum schema migrations.

use clap::Parser;

use stratum_cli::cli::{Cli, Command};
use stratum_cli::commands;
use stratum_cli::config::Settings;
use stratum_cli::error::CliResult;
use stratum_cli::output;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.global.verbose {
        stratum_migrate::logging::init_with_level("debug");
    } else {
        stratum_migrate::logging::init();
    }

    if let Err(e) = run(cli).await {
        output::newline();
        output::error(&e.to_string());
        if let Some(hint) = e.hint() {
            output::hint(hint);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let command = match cli.command {
        Command::Init(args) => return commands::init::run(&cli.global, args).await,
        other => other,
    };
    let settings = Settings::resolve(&cli.global)?;

    match command {
        Command::Init(_) => unreachable!("handled above"),
        Command::Revision(args) => commands::revision::run_revision(&settings, args).await,
        Command::Merge(args) => commands::revision::run_merge(&settings, args).await,
        Command::Upgrade(args) => commands::migrate::run_upgrade(&settings, args).await,
        Command::Downgrade(args) => commands::migrate::run_downgrade(&settings, args).await,
        Command::Stamp(args) => commands::migrate::run_stamp(&settings, args).await,
        Command::Current => commands::migrate::run_current(&settings).await,
        Command::History => commands::history::run_history(&settings).await,
        Command::Heads => commands::history::run_heads(&settings).await,
        Command::Branches => commands::history::run_branches(&settings).await,
        Command::Show(args) => commands::history::run_show(&settings, args).await,
        Command::Unlock => commands::migrate::run_unlock(&settings).await,
    }
}
