//! CLI command implementations.

pub mod history;
pub mod init;
pub mod migrate;
pub mod revision;

use std::sync::Arc;

use stratum_migrate::{
    MigrationRunner, Revision, RevisionGraph, ScriptRepository, TableVersionTracker,
};

use crate::config::Settings;
use crate::error::CliResult;

/// Repository for the configured scripts directory.
pub(crate) fn repository(settings: &Settings) -> ScriptRepository {
    ScriptRepository::new(&settings.directory)
}

/// Load and validate the revision graph.
pub(crate) async fn load_graph(settings: &Settings) -> CliResult<Arc<RevisionGraph>> {
    Ok(repository(settings).load().await?)
}

/// Runner over the configured version table.
pub(crate) fn runner(
    settings: &Settings,
    graph: Arc<RevisionGraph>,
) -> MigrationRunner<TableVersionTracker> {
    let tracker = TableVersionTracker::new(&settings.version_table)
        .with_schema(settings.schema.as_deref());
    MigrationRunner::new(settings.migration_config(), graph, tracker)
}

/// `id, label` as printed in listings.
pub(crate) fn describe(revision: &Revision) -> String {
    if revision.label.is_empty() {
        revision.id.to_string()
    } else {
        format!("{}, {}", revision.id, revision.label)
    }
}
