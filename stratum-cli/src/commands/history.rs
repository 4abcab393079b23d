//! `stratum history`, `heads`, `branches` and `show` - Inspect the revision graph.

use stratum_migrate::{BASE, RevisionGraph, RevisionId};

use crate::cli::ShowArgs;
use crate::commands::{describe, load_graph};
use crate::config::Settings;
use crate::error::CliResult;
use crate::output;

/// Run the history command
pub async fn run_history(settings: &Settings) -> CliResult<()> {
    let graph = load_graph(settings).await?;
    for line in history_lines(&graph) {
        println!("{}", line);
    }
    Ok(())
}

/// One line per revision, newest first: `parents -> id (markers), label`.
pub fn history_lines(graph: &RevisionGraph) -> Vec<String> {
    let heads = graph.heads();
    let branch_points = graph.branch_points();

    graph
        .iter()
        .rev()
        .map(|revision| {
            let parents = if revision.parents.is_empty() {
                format!("<{}>", BASE)
            } else {
                join(&revision.parents)
            };

            let mut markers = Vec::new();
            if heads.contains(&revision.id) {
                markers.push("head");
            }
            if branch_points.contains(&revision.id) {
                markers.push("branchpoint");
            }
            if revision.is_merge() {
                markers.push("mergepoint");
            }
            let markers = if markers.is_empty() {
                String::new()
            } else {
                format!(" ({})", markers.join(") ("))
            };

            format!(
                "{} -> {}{}, {}",
                parents, revision.id, markers, revision.label
            )
        })
        .collect()
}

/// Run the heads command
pub async fn run_heads(settings: &Settings) -> CliResult<()> {
    let graph = load_graph(settings).await?;
    for id in graph.heads() {
        if let Some(revision) = graph.get(id.as_str()) {
            println!("{} (head)", describe(revision));
        }
    }
    Ok(())
}

/// Run the branches command
pub async fn run_branches(settings: &Settings) -> CliResult<()> {
    let graph = load_graph(settings).await?;
    let branch_points = graph.branch_points();
    if branch_points.is_empty() {
        output::dim("No branch points");
        return Ok(());
    }

    for id in branch_points {
        if let Some(revision) = graph.get(id.as_str()) {
            println!("{} (branchpoint)", describe(revision));
        }
        for child in graph.children(id.as_str()) {
            if let Some(revision) = graph.get(child.as_str()) {
                println!("    -> {}", describe(revision));
            }
        }
    }
    Ok(())
}

/// Run the show command
pub async fn run_show(settings: &Settings, args: ShowArgs) -> CliResult<()> {
    let graph = load_graph(settings).await?;
    let revision = graph.resolve(&args.revision)?;

    output::header(&format!("Revision {}", revision.id));
    output::kv("Label", &revision.label);
    output::kv(
        "Parents",
        &if revision.parents.is_empty() {
            BASE.to_string()
        } else {
            join(&revision.parents)
        },
    );
    let children = graph.children(revision.id.as_str());
    output::kv(
        "Children",
        &if children.is_empty() {
            "(head)".to_string()
        } else {
            join(&children)
        },
    );
    if let Some(date) = revision.create_date {
        output::kv("Created", &date.to_rfc3339());
    }
    if let Some(path) = &revision.path {
        output::kv("Path", &path.display().to_string());
    }
    Ok(())
}

fn join(ids: &[RevisionId]) -> String {
    ids.iter()
        .map(RevisionId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratum_migrate::{Revision, SqlScript};

    fn revision(id: &str, parents: &[&str], label: &str) -> Revision {
        Revision::new(
            RevisionId::new(id).unwrap(),
            parents.iter().map(|p| RevisionId::new(*p).unwrap()).collect(),
            label,
            Arc::new(SqlScript::new("SELECT 1", None)),
        )
    }

    #[test]
    fn test_history_marks_heads_and_branches() {
        let graph = RevisionGraph::new(vec![
            revision("aaa", &[], "create accounts"),
            revision("bbb", &["aaa"], "add email"),
            revision("ccc", &["aaa"], "add phone"),
        ])
        .unwrap();

        let lines = history_lines(&graph);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "<base> -> aaa (branchpoint), create accounts");
        assert!(lines.iter().any(|l| l == "aaa -> bbb (head), add email"));
        assert!(lines.iter().any(|l| l == "aaa -> ccc (head), add phone"));
    }

    #[test]
    fn test_history_marks_merges() {
        let graph = RevisionGraph::new(vec![
            revision("aaa", &[], "root"),
            revision("bbb", &["aaa"], "left"),
            revision("ccc", &["aaa"], "right"),
            revision("ddd", &["bbb", "ccc"], "merge"),
        ])
        .unwrap();

        let lines = history_lines(&graph);
        assert_eq!(lines[0], "bbb, ccc -> ddd (head) (mergepoint), merge");
    }
}
