//! `stratum revision` and `stratum merge` - Author new revisions.

use stratum_migrate::{BASE, RevisionId};

use crate::cli::{MergeArgs, RevisionArgs};
use crate::commands::{load_graph, repository};
use crate::config::Settings;
use crate::error::{CliError, CliResult};
use crate::output::{self, success};

/// Run the revision command
pub async fn run_revision(settings: &Settings, args: RevisionArgs) -> CliResult<()> {
    let repo = repository(settings);
    repo.ensure_dir().await?;

    let parents: Vec<RevisionId> = if repo.scan().await?.is_empty() {
        match args.head.as_deref() {
            None | Some(BASE) => Vec::new(),
            Some(other) => {
                return Err(CliError::Command(format!(
                    "no revisions exist yet, so '{}' cannot be a parent",
                    other
                )));
            }
        }
    } else {
        let graph = repo.load().await?;
        let parent = match args.head.as_deref() {
            Some(spec) => graph.resolve(spec)?,
            None => graph.single_head()?,
        };
        vec![parent.id.clone()]
    };

    let path = repo.create_revision(&args.message, &parents).await?;

    success(&format!("Created revision '{}'", args.message));
    output::kv("Path", &path.display().to_string());
    match parents.first() {
        Some(parent) => output::kv("Parent", parent.as_str()),
        None => output::kv("Parent", BASE),
    }
    Ok(())
}

/// Run the merge command
pub async fn run_merge(settings: &Settings, args: MergeArgs) -> CliResult<()> {
    let graph = load_graph(settings).await?;

    let parents: Vec<RevisionId> = if args.revisions.is_empty() {
        graph.heads()
    } else {
        let mut parents = Vec::with_capacity(args.revisions.len());
        for spec in &args.revisions {
            let id = graph.resolve(spec)?.id.clone();
            if !parents.contains(&id) {
                parents.push(id);
            }
        }
        parents
    };

    if parents.len() < 2 {
        return Err(CliError::Command(
            "nothing to merge: name at least two distinct revisions".to_string(),
        ));
    }

    let label = args.message.unwrap_or_else(|| {
        format!(
            "merge {}",
            parents
                .iter()
                .map(RevisionId::as_str)
                .collect::<Vec<_>>()
                .join(" and ")
        )
    });
    let path = repository(settings).create_revision(&label, &parents).await?;

    success(&format!("Created merge revision '{}'", label));
    output::kv("Path", &path.display().to_string());
    for parent in &parents {
        output::list_item(parent.as_str());
    }
    Ok(())
}
