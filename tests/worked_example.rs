//! A linear base -> A -> B history driven through the facade.

use pretty_assertions::assert_eq;
use stratum::prelude::*;
use stratum::sqlite::{SqliteConfig, SqliteConnection};

struct CreateAuthors;

#[async_trait::async_trait]
impl MigrationScript for CreateAuthors {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.create_table(
            &Table::new("authors")
                .column(Column::new("id", "INTEGER").primary_key())
                .column(Column::new("name", "TEXT").not_null()),
        )
        .await
    }

    async fn downgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.drop_table("authors").await
    }
}

struct AddBio;

#[async_trait::async_trait]
impl MigrationScript for AddBio {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.add_column("authors", &Column::new("bio", "TEXT")).await
    }

    async fn downgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.batch_alter_table("authors", |batch| {
            batch.drop_column("bio");
        })
        .await
    }
}

fn runner() -> MigrationRunner<TableVersionTracker> {
    let mut registry = ScriptRegistry::new();
    registry
        .register_revision(RevisionSpec::new("aaaa", "create authors").unwrap(), CreateAuthors)
        .unwrap();
    registry
        .register_revision(
            RevisionSpec::new("bbbb", "add bio").unwrap().parent("aaaa").unwrap(),
            AddBio,
        )
        .unwrap();

    let graph = RevisionGraph::new(registry.revisions()).unwrap();
    MigrationRunner::new(MigrationConfig::new(), graph, TableVersionTracker::default())
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn applied(runner: &MigrationRunner<TableVersionTracker>, conn: &mut SqliteConnection) -> Vec<String> {
    runner
        .current(conn)
        .await
        .unwrap()
        .into_iter()
        .map(|id| id.to_string())
        .collect()
}

#[tokio::test]
async fn upgrade_from_partial_then_back_to_base() {
    let runner = runner();
    let mut conn = SqliteConnection::open(SqliteConfig::memory()).await.unwrap();

    let first = runner
        .run(&mut conn, &Target::Revision("aaaa".to_string()))
        .await
        .unwrap();
    assert_eq!(first.upgraded(), 1);
    assert_eq!(applied(&runner, &mut conn).await, ids(&["aaaa"]));

    let result = runner.run(&mut conn, &Target::Head).await.unwrap();
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].direction, Direction::Upgrade);
    assert_eq!(result.steps[0].revision.as_str(), "bbbb");
    assert_eq!(applied(&runner, &mut conn).await, ids(&["aaaa", "bbbb"]));

    conn.execute("INSERT INTO authors (name, bio) VALUES ('Ada', 'analyst')")
        .await
        .unwrap();

    let result = runner.run(&mut conn, &Target::Base).await.unwrap();
    let order: Vec<&str> = result.steps.iter().map(|s| s.revision.as_str()).collect();
    assert_eq!(order, vec!["bbbb", "aaaa"]);
    assert!(result.steps.iter().all(|s| s.direction == Direction::Downgrade));
    assert!(applied(&runner, &mut conn).await.is_empty());
    assert!(result.summary().starts_with("2 downgraded"));
}

#[tokio::test]
async fn status_reports_pending_revisions() {
    let runner = runner();
    let mut conn = SqliteConnection::open(SqliteConfig::memory()).await.unwrap();

    let status = runner.status(&mut conn).await.unwrap();
    assert!(!status.is_up_to_date());
    assert_eq!(status.pending.len(), 2);

    runner.run(&mut conn, &Target::Head).await.unwrap();
    let status = runner.status(&mut conn).await.unwrap();
    assert!(status.is_up_to_date());
}
