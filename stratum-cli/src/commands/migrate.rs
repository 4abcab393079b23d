//! `stratum upgrade`, `downgrade`, `stamp`, `current` and `unlock`.

use stratum_migrate::{
    Direction, MigrationRunner, RunResult, StopSignal, TableVersionTracker, Target,
    VersionTracker,
};
use tracing::info;

use crate::backend;
use crate::cli::{DowngradeArgs, StampArgs, UpgradeArgs};
use crate::commands::{load_graph, runner};
use crate::config::Settings;
use crate::error::{CliError, CliResult};
use crate::output::{self, success};

/// Run the upgrade command
pub async fn run_upgrade(settings: &Settings, args: UpgradeArgs) -> CliResult<()> {
    output::header("Upgrade");
    move_to(
        settings,
        &args.target,
        Direction::Upgrade,
        args.dry_run,
        args.single_transaction,
    )
    .await
}

/// Run the downgrade command
pub async fn run_downgrade(settings: &Settings, args: DowngradeArgs) -> CliResult<()> {
    output::header("Downgrade");
    move_to(
        settings,
        &args.target,
        Direction::Downgrade,
        args.dry_run,
        args.single_transaction,
    )
    .await
}

async fn move_to(
    settings: &Settings,
    target: &str,
    direction: Direction,
    dry_run: bool,
    single_transaction: bool,
) -> CliResult<()> {
    let target: Target = target.parse()?;

    let mut settings = settings.clone();
    if single_transaction {
        settings.transaction_per_step = false;
    }

    let graph = load_graph(&settings).await?;
    let stop = StopSignal::new();
    let runner = runner(&settings, graph).with_stop_signal(stop.clone());
    let mut conn = backend::connect(settings.database_url()?).await?;

    let plan = runner.plan(conn.as_mut(), &target).await?;
    if let Some(step) = plan.iter().find(|s| s.direction != direction) {
        let command = match step.direction {
            Direction::Upgrade => "upgrade",
            Direction::Downgrade => "downgrade",
        };
        return Err(CliError::Command(format!(
            "reaching '{}' requires a {} of revision {}; use `stratum {} {}`",
            target,
            step.direction,
            step.id(),
            command,
            target
        )));
    }

    if dry_run {
        if plan.is_empty() {
            output::info("Already at target");
        }
        for step in &plan {
            output::list_item(&step.to_string());
        }
        output::newline();
        output::dim(&format!("[DRY RUN] {} step(s) planned, nothing executed", plan.len()));
        return Ok(());
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let result = runner.run(conn.as_mut(), &target).await?;
    print_result(&result);
    Ok(())
}

fn print_result(result: &RunResult) {
    for step in &result.steps {
        let arrow = match step.direction {
            Direction::Upgrade => "->",
            Direction::Downgrade => "<-",
        };
        output::list_item(&format!(
            "{} {}, {} {}",
            arrow,
            step.revision,
            step.label,
            output::style_pending(&format!("({}ms)", step.duration_ms))
        ));
    }
    output::newline();
    if result.stopped {
        output::warn(&result.summary());
    } else {
        success(&result.summary());
    }
    output::kv("Current", &heads_line(&result.heads));
}

fn heads_line(heads: &[stratum_migrate::RevisionId]) -> String {
    if heads.is_empty() {
        stratum_migrate::BASE.to_string()
    } else {
        heads
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Run the stamp command
pub async fn run_stamp(settings: &Settings, args: StampArgs) -> CliResult<()> {
    output::header("Stamp");
    let target: Target = args.target.parse()?;

    let graph = load_graph(settings).await?;
    let runner = runner(settings, graph);
    let mut conn = backend::connect(settings.database_url()?).await?;

    let result = runner.stamp(conn.as_mut(), &target).await?;
    for step in &result.steps {
        let verb = match step.direction {
            Direction::Upgrade => "marked applied",
            Direction::Downgrade => "marked unapplied",
        };
        output::list_item(&format!("{} {}", step.revision, verb));
    }
    output::newline();
    success(&format!("Stamped {}", target));
    output::kv("Current", &heads_line(&result.heads));
    Ok(())
}

/// Run the current command
pub async fn run_current(settings: &Settings) -> CliResult<()> {
    let graph = load_graph(settings).await?;
    let runner = runner(settings, graph);
    let mut conn = backend::connect(settings.database_url()?).await?;

    let status = runner.status(conn.as_mut()).await?;
    let records = runner.tracker().records(conn.as_mut()).await?;

    output::header("Current revision");
    if status.current_heads.is_empty() {
        output::kv("Current", stratum_migrate::BASE);
    }
    for head in &status.current_heads {
        let label = runner
            .graph()
            .get(head.as_str())
            .map(|r| r.label.clone())
            .unwrap_or_default();
        let applied_at = records
            .iter()
            .find(|r| &r.id == head)
            .and_then(|r| r.applied_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        output::list_item(&format!(
            "{} {} {}",
            output::style_success(head.as_str()),
            label,
            applied_at
        ));
    }

    output::newline();
    if status.is_up_to_date() {
        success("Database is up to date");
    } else {
        output::info(&format!(
            "{} revision(s) pending; run `stratum upgrade`",
            status.pending.len()
        ));
    }
    Ok(())
}

/// Run the unlock command
pub async fn run_unlock(settings: &Settings) -> CliResult<()> {
    let graph = load_graph(settings).await?;
    let runner: MigrationRunner<TableVersionTracker> = runner(settings, graph);
    let mut conn = backend::connect(settings.database_url()?).await?;

    runner.force_unlock(conn.as_mut()).await?;
    info!(table = %settings.version_table, "Migration lock released");
    success("Migration lock released");
    Ok(())
}
