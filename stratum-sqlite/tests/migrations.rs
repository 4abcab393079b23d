//! End-to-end migration runs against SQLite.

use std::collections::BTreeSet;
use std::path::Path;

use pretty_assertions::assert_eq;
use stratum_migrate::{
    AlterColumn, Column, Connection, Index, MigrateResult, MigrationConfig, MigrationError,
    MigrationLock, MigrationRunner, MigrationScript, Operations, RevisionId, RevisionSpec,
    ScriptRegistry, ScriptRepository, Table, TableVersionTracker, Target, row_i64, row_str,
};
use stratum_sqlite::{SqliteConfig, SqliteConnection};
use tempfile::TempDir;

fn write_revision(dir: &Path, id: &str, parent: Option<&str>, up: &str, down: Option<&str>) {
    let rev_dir = dir.join(format!("{}_rev", id));
    std::fs::create_dir_all(&rev_dir).unwrap();

    let mut meta = format!("id = \"{}\"\nlabel = \"revision {}\"\n", id, id);
    if let Some(parent) = parent {
        meta.push_str(&format!("parent = \"{}\"\n", parent));
    }
    std::fs::write(rev_dir.join("revision.toml"), meta).unwrap();
    std::fs::write(rev_dir.join("up.sql"), up).unwrap();
    if let Some(down) = down {
        std::fs::write(rev_dir.join("down.sql"), down).unwrap();
    }
}

fn runner(graph: std::sync::Arc<stratum_migrate::RevisionGraph>) -> MigrationRunner<TableVersionTracker> {
    MigrationRunner::new(MigrationConfig::new(), graph, TableVersionTracker::default())
}

async fn memory() -> SqliteConnection {
    SqliteConnection::open(SqliteConfig::memory()).await.unwrap()
}

async fn table_exists(conn: &mut SqliteConnection, table: &str) -> bool {
    let rows = conn
        .query(&format!(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = '{}'",
            table
        ))
        .await
        .unwrap();
    row_i64(&rows[0], "n") == Some(1)
}

async fn count(conn: &mut SqliteConnection, sql: &str) -> i64 {
    let rows = conn.query(sql).await.unwrap();
    row_i64(&rows[0], "n").unwrap()
}

fn ids(list: &[&str]) -> BTreeSet<RevisionId> {
    list.iter().map(|id| RevisionId::new(*id).unwrap()).collect()
}

#[tokio::test]
async fn upgrade_and_downgrade_script_directory() {
    let dir = TempDir::new().unwrap();
    write_revision(
        dir.path(),
        "aaa111",
        None,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
        Some("DROP TABLE users;"),
    );
    write_revision(
        dir.path(),
        "bbb222",
        Some("aaa111"),
        "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users (id));",
        Some("DROP TABLE posts;"),
    );

    let graph = ScriptRepository::new(dir.path()).load().await.unwrap();
    let runner = runner(graph);
    let mut conn = memory().await;

    let result = runner.run(&mut conn, &Target::Head).await.unwrap();
    assert_eq!(result.upgraded(), 2);
    assert!(table_exists(&mut conn, "users").await);
    assert!(table_exists(&mut conn, "posts").await);
    assert_eq!(
        runner.current(&mut conn).await.unwrap(),
        ids(&["aaa111", "bbb222"])
    );

    let again = runner.run(&mut conn, &Target::Head).await.unwrap();
    assert!(!again.has_changes());

    let result = runner.run(&mut conn, &Target::Base).await.unwrap();
    assert_eq!(result.downgraded(), 2);
    assert_eq!(result.steps[0].revision.as_str(), "bbb222");
    assert!(!table_exists(&mut conn, "users").await);
    assert!(runner.current(&mut conn).await.unwrap().is_empty());
    assert_eq!(
        count(&mut conn, "SELECT COUNT(*) AS n FROM stratum_version_lock").await,
        0
    );
}

#[tokio::test]
async fn failed_revision_rolls_back_and_resumes() {
    let dir = TempDir::new().unwrap();
    write_revision(
        dir.path(),
        "aaa111",
        None,
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        Some("DROP TABLE users;"),
    );
    write_revision(
        dir.path(),
        "bbb222",
        Some("aaa111"),
        "CREATE TABLE audit (id INTEGER);\nINSERT INTO missing_table VALUES (1);",
        Some("DROP TABLE audit;"),
    );

    let mut conn = memory().await;
    let graph = ScriptRepository::new(dir.path()).load().await.unwrap();
    let err = runner(graph).run(&mut conn, &Target::Head).await.unwrap_err();
    assert!(matches!(err, MigrationError::Database(_)));

    assert!(table_exists(&mut conn, "users").await);
    assert!(!table_exists(&mut conn, "audit").await);

    std::fs::write(
        dir.path().join("bbb222_rev").join("up.sql"),
        "CREATE TABLE audit (id INTEGER);",
    )
    .unwrap();

    let graph = ScriptRepository::new(dir.path()).load().await.unwrap();
    let runner = runner(graph);
    assert_eq!(runner.current(&mut conn).await.unwrap(), ids(&["aaa111"]));

    let result = runner.run(&mut conn, &Target::Head).await.unwrap();
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].revision.as_str(), "bbb222");
    assert!(table_exists(&mut conn, "audit").await);
}

#[tokio::test]
async fn branches_require_a_merge_revision() {
    let dir = TempDir::new().unwrap();
    write_revision(dir.path(), "root00", None, "CREATE TABLE a (id INTEGER);", None);
    write_revision(dir.path(), "left00", Some("root00"), "CREATE TABLE b (id INTEGER);", None);
    write_revision(dir.path(), "right0", Some("root00"), "CREATE TABLE c (id INTEGER);", None);

    let mut conn = memory().await;
    let repository = ScriptRepository::new(dir.path());
    let graph = repository.load().await.unwrap();
    let err = runner(graph.clone())
        .run(&mut conn, &Target::Head)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::MultipleHeads { .. }));
    assert!(!table_exists(&mut conn, "a").await);

    let heads = graph.heads();
    repository.create_revision("merge branches", &heads).await.unwrap();

    let graph = ScriptRepository::new(dir.path()).load().await.unwrap();
    assert_eq!(graph.heads().len(), 1);

    let result = runner(graph).run(&mut conn, &Target::Head).await.unwrap();
    assert_eq!(result.upgraded(), 4);
    assert_eq!(result.heads.len(), 1);
    assert!(table_exists(&mut conn, "b").await);
    assert!(table_exists(&mut conn, "c").await);
}

#[tokio::test]
async fn irreversible_revision_blocks_downgrade() {
    let dir = TempDir::new().unwrap();
    write_revision(
        dir.path(),
        "aaa111",
        None,
        "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        Some("DROP TABLE users;"),
    );
    write_revision(
        dir.path(),
        "bbb222",
        Some("aaa111"),
        "INSERT INTO users (id) VALUES (1);",
        None,
    );

    let mut conn = memory().await;
    let runner = runner(ScriptRepository::new(dir.path()).load().await.unwrap());
    runner.run(&mut conn, &Target::Head).await.unwrap();

    let err = runner.run(&mut conn, &Target::Base).await.unwrap_err();
    assert!(matches!(err, MigrationError::Irreversible(_)));
    assert_eq!(
        runner.current(&mut conn).await.unwrap(),
        ids(&["aaa111", "bbb222"])
    );
    assert_eq!(count(&mut conn, "SELECT COUNT(*) AS n FROM users").await, 1);
}

struct CreateAccounts;

#[async_trait::async_trait]
impl MigrationScript for CreateAccounts {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.create_table(
            &Table::new("accounts")
                .column(Column::new("id", "INTEGER").primary_key())
                .column(Column::new("email", "TEXT").not_null()),
        )
        .await?;
        op.create_index(&Index::new("ix_accounts_email", "accounts", &["email"]).unique())
            .await?;
        op.execute("INSERT INTO accounts (email) VALUES ('a@example.com'), ('b@example.com')")
            .await
    }

    async fn downgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.drop_table("accounts").await
    }
}

struct AddRequiredTier;

#[async_trait::async_trait]
impl MigrationScript for AddRequiredTier {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.batch_alter_table("accounts", |batch| {
            batch.add_column(Column::new("tier", "TEXT").not_null());
        })
        .await
    }
}

struct AddTierInStages;

#[async_trait::async_trait]
impl MigrationScript for AddTierInStages {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.add_column("accounts", &Column::new("tier", "TEXT")).await?;
        op.execute("UPDATE accounts SET tier = 'free'").await?;
        op.batch_alter_table("accounts", |batch| {
            batch.alter_column(AlterColumn::new("tier").nullable(false));
        })
        .await
    }

    async fn downgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.batch_alter_table("accounts", |batch| {
            batch.drop_column("tier");
        })
        .await
    }
}

fn accounts_registry(second: impl MigrationScript + 'static) -> ScriptRegistry {
    let mut registry = ScriptRegistry::new();
    registry
        .register_revision(
            RevisionSpec::new("acct01", "create accounts").unwrap(),
            CreateAccounts,
        )
        .unwrap();
    registry
        .register_revision(
            RevisionSpec::new("acct02", "add tier")
                .unwrap()
                .parent("acct01")
                .unwrap(),
            second,
        )
        .unwrap();
    registry
}

async fn column_info(conn: &mut SqliteConnection, column: &str) -> Option<i64> {
    let rows = conn.query("PRAGMA table_info(accounts)").await.unwrap();
    rows.iter()
        .find(|r| row_str(r, "name").as_deref() == Some(column))
        .and_then(|r| row_i64(r, "notnull"))
}

#[tokio::test]
async fn batch_rejects_not_null_column_on_populated_table() {
    let dir = TempDir::new().unwrap();
    let repository =
        ScriptRepository::new(dir.path()).with_registry(accounts_registry(AddRequiredTier));
    let runner = runner(repository.load().await.unwrap());
    let mut conn = memory().await;

    let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
    assert!(matches!(err, MigrationError::BatchOperation { .. }));

    assert_eq!(runner.current(&mut conn).await.unwrap(), ids(&["acct01"]));
    assert_eq!(column_info(&mut conn, "tier").await, None);
    assert_eq!(count(&mut conn, "SELECT COUNT(*) AS n FROM accounts").await, 2);
}

#[tokio::test]
async fn batch_backfill_then_not_null_rebuilds_table() {
    let dir = TempDir::new().unwrap();
    let repository =
        ScriptRepository::new(dir.path()).with_registry(accounts_registry(AddTierInStages));
    let runner = runner(repository.load().await.unwrap());
    let mut conn = memory().await;

    runner.run(&mut conn, &Target::Head).await.unwrap();

    assert_eq!(column_info(&mut conn, "tier").await, Some(1));
    assert_eq!(
        count(&mut conn, "SELECT COUNT(*) AS n FROM accounts WHERE tier = 'free'").await,
        2
    );
    let indexes = conn.query("PRAGMA index_list(accounts)").await.unwrap();
    assert!(
        indexes
            .iter()
            .any(|r| row_str(r, "name").as_deref() == Some("ix_accounts_email"))
    );
    assert!(!table_exists(&mut conn, "_stratum_tmp_accounts").await);

    runner.run(&mut conn, &Target::Relative(-1)).await.unwrap();
    assert_eq!(column_info(&mut conn, "tier").await, None);
    assert_eq!(count(&mut conn, "SELECT COUNT(*) AS n FROM accounts").await, 2);
}

struct AddDuplicateEmail;

#[async_trait::async_trait]
impl MigrationScript for AddDuplicateEmail {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.batch_alter_table("accounts", |batch| {
            batch
                .add_column(Column::new("note", "TEXT"))
                .add_column(Column::new("email", "TEXT"));
        })
        .await
    }
}

#[tokio::test]
async fn batch_validates_in_place_changes_before_running_them() {
    let dir = TempDir::new().unwrap();
    let repository =
        ScriptRepository::new(dir.path()).with_registry(accounts_registry(AddDuplicateEmail));
    let runner = runner(repository.load().await.unwrap());
    let mut conn = memory().await;

    let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
    match &err {
        MigrationError::BatchOperation { table, message } => {
            assert_eq!(table, "accounts");
            assert!(message.contains("'email' already exists"), "{}", message);
        }
        other => panic!("expected a batch error, got {:?}", other),
    }

    assert_eq!(runner.current(&mut conn).await.unwrap(), ids(&["acct01"]));
    assert_eq!(column_info(&mut conn, "note").await, None);
}

struct CreateStock;

#[async_trait::async_trait]
impl MigrationScript for CreateStock {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.execute(
            "CREATE TABLE stock (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             qty INTEGER CHECK (qty > 0), name TEXT)",
        )
        .await?;
        op.execute("INSERT INTO stock (qty, name) VALUES (3, 'bolt')").await
    }
}

struct NarrowStockName;

#[async_trait::async_trait]
impl MigrationScript for NarrowStockName {
    async fn upgrade(&self, op: &mut Operations<'_>) -> MigrateResult<()> {
        op.batch_alter_table("stock", |batch| {
            batch.alter_column(AlterColumn::new("name").set_type("VARCHAR(20)"));
        })
        .await
    }
}

#[tokio::test]
async fn batch_refuses_rebuild_that_would_drop_constraints() {
    let mut registry = ScriptRegistry::new();
    registry
        .register_revision(RevisionSpec::new("stock1", "create stock").unwrap(), CreateStock)
        .unwrap();
    registry
        .register_revision(
            RevisionSpec::new("stock2", "narrow name")
                .unwrap()
                .parent("stock1")
                .unwrap(),
            NarrowStockName,
        )
        .unwrap();
    let dir = TempDir::new().unwrap();
    let runner = runner(
        ScriptRepository::new(dir.path())
            .with_registry(registry)
            .load()
            .await
            .unwrap(),
    );
    let mut conn = memory().await;

    let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
    match &err {
        MigrationError::BatchOperation { message, .. } => {
            assert!(message.contains("CHECK constraints"), "{}", message);
            assert!(message.contains("AUTOINCREMENT"), "{}", message);
        }
        other => panic!("expected a batch error, got {:?}", other),
    }

    assert_eq!(runner.current(&mut conn).await.unwrap(), ids(&["stock1"]));
    assert!(!table_exists(&mut conn, "_stratum_tmp_stock").await);
    assert!(
        conn.execute("INSERT INTO stock (qty, name) VALUES (-5, 'x')")
            .await
            .is_err()
    );
    assert_eq!(count(&mut conn, "SELECT COUNT(*) AS n FROM stock").await, 1);
}

#[tokio::test]
async fn concurrent_run_fails_fast() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("app.db");
    let scripts = dir.path().join("migrations");
    std::fs::create_dir_all(&scripts).unwrap();
    write_revision(&scripts, "aaa111", None, "CREATE TABLE users (id INTEGER);", None);

    let runner = runner(ScriptRepository::new(&scripts).load().await.unwrap());
    let mut holder = SqliteConnection::open(SqliteConfig::file(&db)).await.unwrap();
    let mut contender = SqliteConnection::open(SqliteConfig::file(&db)).await.unwrap();

    let lock = MigrationLock::for_version_table("stratum_version", None);
    holder.acquire_lock(&lock).await.unwrap();

    let err = runner.run(&mut contender, &Target::Head).await.unwrap_err();
    assert!(matches!(err, MigrationError::ConcurrentMigration(_)));
    assert!(!table_exists(&mut contender, "users").await);

    holder.release_lock(&lock).await.unwrap();
    runner.run(&mut contender, &Target::Head).await.unwrap();
    assert!(table_exists(&mut contender, "users").await);
}

#[tokio::test]
async fn stamp_records_without_running_scripts() {
    let dir = TempDir::new().unwrap();
    write_revision(dir.path(), "aaa111", None, "CREATE TABLE users (id INTEGER);", None);

    let runner = runner(ScriptRepository::new(dir.path()).load().await.unwrap());
    let mut conn = memory().await;

    runner.stamp(&mut conn, &Target::Head).await.unwrap();
    assert_eq!(runner.current(&mut conn).await.unwrap(), ids(&["aaa111"]));
    assert!(!table_exists(&mut conn, "users").await);
}
