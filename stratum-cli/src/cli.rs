//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Stratum - revision-graph schema migrations
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(version)]
#[command(about = "Stratum - revision-graph schema migrations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Global options shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options accepted before or after any subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = crate::config::CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Database URL (overrides the configuration file)
    #[arg(short, long, global = true, env = "STRATUM_DATABASE_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// Revision scripts directory (overrides the configuration file)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Schema holding the version table
    #[arg(long, global = true)]
    pub schema: Option<String>,

    /// Print debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a configuration file and an empty scripts directory
    Init(InitArgs),

    /// Create a new revision on top of the current head
    Revision(RevisionArgs),

    /// Create a merge revision joining several heads
    Merge(MergeArgs),

    /// Upgrade the database to a target revision
    Upgrade(UpgradeArgs),

    /// Downgrade the database to a target revision
    Downgrade(DowngradeArgs),

    /// Record a target as applied without running any scripts
    Stamp(StampArgs),

    /// Show the revisions applied to the database
    Current,

    /// List revisions from newest to oldest
    History,

    /// List the head revisions
    Heads,

    /// List the revisions where history branches
    Branches,

    /// Show details of one revision
    Show(ShowArgs),

    /// Release a migration lock left behind by a crashed run
    Unlock,
}

// =============================================================================
// Init Command
// =============================================================================

/// Arguments for the `init` command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Scripts directory to create
    #[arg(default_value = crate::config::MIGRATIONS_DIR)]
    pub directory: PathBuf,

    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

// =============================================================================
// Authoring Commands
// =============================================================================

/// Arguments for the `revision` command
#[derive(Args, Debug)]
pub struct RevisionArgs {
    /// Label describing the change
    #[arg(short, long)]
    pub message: String,

    /// Parent revision (defaults to the single head)
    #[arg(long)]
    pub head: Option<String>,
}

/// Arguments for the `merge` command
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Label of the merge revision
    #[arg(short, long)]
    pub message: Option<String>,

    /// Revisions to merge (defaults to every head)
    pub revisions: Vec<String>,
}

// =============================================================================
// Run Commands
// =============================================================================

/// Arguments for the `upgrade` command
#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Target: head, heads, a revision id or prefix, or +N
    #[arg(default_value = "head")]
    pub target: String,

    /// Print the plan without executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Run every step in one transaction
    #[arg(long)]
    pub single_transaction: bool,
}

/// Arguments for the `downgrade` command
#[derive(Args, Debug)]
pub struct DowngradeArgs {
    /// Target: base, a revision id or prefix, or -N
    #[arg(allow_negative_numbers = true)]
    pub target: String,

    /// Print the plan without executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Run every step in one transaction
    #[arg(long)]
    pub single_transaction: bool,
}

/// Arguments for the `stamp` command
#[derive(Args, Debug)]
pub struct StampArgs {
    /// Target to record: head, heads, base or a revision
    #[arg(allow_negative_numbers = true)]
    pub target: String,
}

/// Arguments for the `show` command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Revision id or unique prefix
    pub revision: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_relative_downgrade_target() {
        let cli = Cli::try_parse_from(["stratum", "downgrade", "-1"]).unwrap();
        match cli.command {
            Command::Downgrade(args) => assert_eq!(args.target, "-1"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["stratum", "upgrade", "--dir", "db/revisions", "--dry-run"])
            .unwrap();
        assert_eq!(cli.global.dir, Some(PathBuf::from("db/revisions")));
        match cli.command {
            Command::Upgrade(args) => {
                assert_eq!(args.target, "head");
                assert!(args.dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
