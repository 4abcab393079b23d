//! Migration runner implementation.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::error::{MigrateResult, MigrationError};
use crate::graph::{BASE, HEAD, RevisionGraph};
use crate::lock::MigrationLock;
use crate::ops::Operations;
use crate::revision::{Direction, RevisionId, Step};
use crate::tracker::{DEFAULT_VERSION_TABLE, VersionTracker};

/// Configuration for the migration runner.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the scripts directory.
    pub scripts_dir: PathBuf,
    /// Name of the version table.
    pub version_table: String,
    /// Schema qualifying the version table and the objects operations touch.
    pub schema: Option<String>,
    /// Compute the steps without executing them.
    pub dry_run: bool,
    /// Commit after every step instead of once for the whole run.
    pub transaction_per_step: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("./migrations"),
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            schema: None,
            dry_run: false,
            transaction_per_step: true,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scripts directory.
    pub fn scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    /// Set the version table name.
    pub fn version_table(mut self, table: impl Into<String>) -> Self {
        self.version_table = table.into();
        self
    }

    /// Set the schema qualifier.
    pub fn schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Choose per-step or per-run transactions.
    pub fn transaction_per_step(mut self, per_step: bool) -> Self {
        self.transaction_per_step = per_step;
        self
    }
}

/// Where a run should leave the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The single head.
    Head,
    /// Every head (all revisions).
    Heads,
    /// Nothing applied.
    Base,
    /// `+N` / `-N` single steps from the current position.
    Relative(i64),
    /// A revision id or unique prefix.
    Revision(String),
}

impl FromStr for Target {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => Err(MigrationError::config("empty revision target")),
            HEAD => Ok(Self::Head),
            "heads" => Ok(Self::Heads),
            BASE => Ok(Self::Base),
            _ if s.starts_with('+') || s.starts_with('-') => s
                .parse::<i64>()
                .map(Self::Relative)
                .map_err(|_| MigrationError::config(format!("invalid relative target '{}'", s))),
            _ => Ok(Self::Revision(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => f.write_str(HEAD),
            Self::Heads => f.write_str("heads"),
            Self::Base => f.write_str(BASE),
            Self::Relative(n) => write!(f, "{:+}", n),
            Self::Revision(spec) => f.write_str(spec),
        }
    }
}

/// Cooperative stop request, honoured between steps.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next step boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One executed (or planned) step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// Revision applied or undone.
    pub revision: RevisionId,
    /// Revision label.
    pub label: String,
    /// Direction.
    pub direction: Direction,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StepRecord {
    fn planned(step: &Step) -> Self {
        Self {
            revision: step.id().clone(),
            label: step.revision.label.clone(),
            direction: step.direction,
            duration_ms: 0,
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
    /// Applied set after the run.
    pub applied: BTreeSet<RevisionId>,
    /// Heads of the applied set.
    pub heads: Vec<RevisionId>,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// The run stopped early at a step boundary.
    pub stopped: bool,
    /// Nothing was executed.
    pub dry_run: bool,
}

impl RunResult {
    /// Number of upgrade steps.
    pub fn upgraded(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.direction == Direction::Upgrade)
            .count()
    }

    /// Number of downgrade steps.
    pub fn downgraded(&self) -> usize {
        self.steps.len() - self.upgraded()
    }

    /// Check if any step ran.
    pub fn has_changes(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.upgraded() > 0 {
            parts.push(format!("{} upgraded", self.upgraded()));
        }
        if self.downgraded() > 0 {
            parts.push(format!("{} downgraded", self.downgraded()));
        }

        let mut summary = if parts.is_empty() {
            "Already at target".to_string()
        } else if self.dry_run {
            format!("[DRY RUN] would run {}", parts.join(", "))
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        };
        if self.stopped {
            summary.push_str(" (stopped early)");
        }
        summary
    }
}

/// Applied state compared with the graph.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Applied revisions.
    pub applied: BTreeSet<RevisionId>,
    /// Heads of the applied set.
    pub current_heads: Vec<RevisionId>,
    /// Heads of the graph.
    pub graph_heads: Vec<RevisionId>,
    /// Unapplied revisions in topological order.
    pub pending: Vec<RevisionId>,
}

impl MigrationStatus {
    /// Check if every revision is applied.
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Moves a database between revisions.
pub struct MigrationRunner<T: VersionTracker> {
    config: MigrationConfig,
    graph: Arc<RevisionGraph>,
    tracker: T,
    stop: StopSignal,
}

impl<T: VersionTracker> MigrationRunner<T> {
    /// Create a runner.
    pub fn new(config: MigrationConfig, graph: impl Into<Arc<RevisionGraph>>, tracker: T) -> Self {
        Self {
            config,
            graph: graph.into(),
            tracker,
            stop: StopSignal::new(),
        }
    }

    /// Use a shared stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// The runner configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The revision graph.
    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    /// The version tracker.
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// The stop signal.
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    fn lock(&self) -> MigrationLock {
        MigrationLock::for_version_table(self.tracker.table_name(), self.tracker.schema())
    }

    /// The validated applied set.
    pub async fn current(&self, conn: &mut dyn Connection) -> MigrateResult<BTreeSet<RevisionId>> {
        self.tracker.ensure(conn).await?;
        let applied = self.tracker.current(conn).await?;
        self.graph.validate_applied(&applied)?;
        Ok(applied)
    }

    /// Applied and pending revisions.
    pub async fn status(&self, conn: &mut dyn Connection) -> MigrateResult<MigrationStatus> {
        let applied = self.current(conn).await?;
        let pending = self
            .graph
            .iter()
            .filter(|r| !applied.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();

        Ok(MigrationStatus {
            current_heads: self.graph.heads_of(&applied),
            graph_heads: self.graph.heads(),
            applied,
            pending,
        })
    }

    /// The applied set `target` denotes, starting from `applied`.
    pub fn desired(
        &self,
        applied: &BTreeSet<RevisionId>,
        target: &Target,
    ) -> MigrateResult<BTreeSet<RevisionId>> {
        match target {
            Target::Head => {
                let head = self.graph.single_head()?;
                self.graph.ancestor_set(head.id.as_str())
            }
            Target::Heads => Ok(self.graph.iter().map(|r| r.id.clone()).collect()),
            Target::Base => Ok(BTreeSet::new()),
            Target::Relative(n) if *n >= 0 => self.graph.advance(applied, n.unsigned_abs() as usize),
            Target::Relative(n) => self.graph.retreat(applied, n.unsigned_abs() as usize),
            Target::Revision(spec) => {
                let revision = self.graph.resolve(spec)?;
                self.graph.ancestor_set(revision.id.as_str())
            }
        }
    }

    /// Compute the steps a run would execute, without executing them.
    pub async fn plan(&self, conn: &mut dyn Connection, target: &Target) -> MigrateResult<Vec<Step>> {
        let applied = self.current(conn).await?;
        let desired = self.desired(&applied, target)?;
        self.graph.transition(&applied, &desired, &target.to_string())
    }

    /// Move the database to `target`.
    pub async fn run(&self, conn: &mut dyn Connection, target: &Target) -> MigrateResult<RunResult> {
        let start = Instant::now();

        if self.config.dry_run {
            let applied = self.current(conn).await?;
            let desired = self.desired(&applied, target)?;
            let steps = self
                .graph
                .transition(&applied, &desired, &target.to_string())?;
            info!(target = %target, steps = steps.len(), "Dry run planned");
            return Ok(RunResult {
                steps: steps.iter().map(StepRecord::planned).collect(),
                heads: self.graph.heads_of(&desired),
                applied: desired,
                duration_ms: start.elapsed().as_millis() as u64,
                stopped: false,
                dry_run: true,
            });
        }

        let lock = self.lock();
        conn.acquire_lock(&lock).await?;
        info!(target = %target, "Migration lock acquired");

        let outcome = self.run_locked(conn, target, start).await;

        if let Err(e) = conn.release_lock(&lock).await {
            warn!(error = %e, "Failed to release migration lock");
        }

        match &outcome {
            Ok(result) => info!(summary = %result.summary(), "Migration run finished"),
            Err(e) => error!(error = %e, "Migration run failed"),
        }
        outcome
    }

    async fn run_locked(
        &self,
        conn: &mut dyn Connection,
        target: &Target,
        start: Instant,
    ) -> MigrateResult<RunResult> {
        let mut applied = self.current(conn).await?;
        let desired = self.desired(&applied, target)?;
        let steps = self
            .graph
            .transition(&applied, &desired, &target.to_string())?;

        let transactional = conn.dialect().transactional_ddl;
        let single_transaction = transactional && !self.config.transaction_per_step && !steps.is_empty();
        if !transactional {
            warn!(
                backend = conn.dialect().name,
                "Backend has non-transactional DDL; each revision is recorded right after its changes"
            );
        }

        let mut records = Vec::with_capacity(steps.len());
        let mut stopped = false;

        if single_transaction {
            conn.begin().await?;
        }

        for step in &steps {
            if self.stop.is_stopped() {
                info!(next = %step, "Stop requested; halting at step boundary");
                stopped = true;
                break;
            }

            info!(revision = %step.id(), direction = %step.direction, "{}", step);
            let step_start = Instant::now();

            let outcome = if single_transaction {
                self.apply_step(conn, step).await
            } else if transactional {
                self.run_step_transactional(conn, step).await
            } else {
                self.run_step_autocommit(conn, step).await
            };

            if let Err(e) = outcome {
                if single_transaction {
                    rollback_quietly(conn).await;
                }
                return Err(e);
            }

            match step.direction {
                Direction::Upgrade => applied.insert(step.id().clone()),
                Direction::Downgrade => applied.remove(step.id()),
            };

            let mut record = StepRecord::planned(step);
            record.duration_ms = step_start.elapsed().as_millis() as u64;
            records.push(record);
        }

        if single_transaction {
            conn.commit().await?;
        }

        Ok(RunResult {
            steps: records,
            heads: self.graph.heads_of(&applied),
            applied,
            duration_ms: start.elapsed().as_millis() as u64,
            stopped,
            dry_run: false,
        })
    }

    async fn run_step_transactional(
        &self,
        conn: &mut dyn Connection,
        step: &Step,
    ) -> MigrateResult<()> {
        conn.begin().await?;
        match self.apply_step(conn, step).await {
            Ok(()) => conn.commit().await,
            Err(e) => {
                rollback_quietly(conn).await;
                Err(e)
            }
        }
    }

    async fn run_step_autocommit(&self, conn: &mut dyn Connection, step: &Step) -> MigrateResult<()> {
        if let Err(e) = self.run_procedure(conn, step).await {
            error!(
                revision = %step.id(),
                "Step failed on a non-transactional backend; its changes may be partially applied"
            );
            return Err(e);
        }

        conn.begin().await?;
        match self.record(conn, step).await {
            Ok(()) => conn.commit().await,
            Err(e) => {
                rollback_quietly(conn).await;
                Err(e)
            }
        }
    }

    async fn apply_step(&self, conn: &mut dyn Connection, step: &Step) -> MigrateResult<()> {
        self.run_procedure(conn, step).await?;
        self.record(conn, step).await
    }

    async fn run_procedure(&self, conn: &mut dyn Connection, step: &Step) -> MigrateResult<()> {
        let mut op = Operations::new(conn, self.config.schema.as_deref(), step.id().clone());
        let script = step.revision.script();
        match step.direction {
            Direction::Upgrade => script.upgrade(&mut op).await,
            Direction::Downgrade => script.downgrade(&mut op).await,
        }
    }

    async fn record(&self, conn: &mut dyn Connection, step: &Step) -> MigrateResult<()> {
        match step.direction {
            Direction::Upgrade => self.tracker.mark_applied(conn, step.id()).await,
            Direction::Downgrade => self.tracker.mark_unapplied(conn, step.id()).await,
        }
    }

    /// Rewrite the applied set to `target` without running any procedure.
    ///
    /// Recorded ids that no longer exist in the graph are removed.
    pub async fn stamp(&self, conn: &mut dyn Connection, target: &Target) -> MigrateResult<RunResult> {
        let start = Instant::now();
        let lock = self.lock();
        conn.acquire_lock(&lock).await?;

        let outcome = self.stamp_locked(conn, target, start).await;

        if let Err(e) = conn.release_lock(&lock).await {
            warn!(error = %e, "Failed to release migration lock");
        }
        outcome
    }

    async fn stamp_locked(
        &self,
        conn: &mut dyn Connection,
        target: &Target,
        start: Instant,
    ) -> MigrateResult<RunResult> {
        self.tracker.ensure(conn).await?;
        let applied = self.tracker.current(conn).await?;
        if matches!(target, Target::Relative(_)) {
            self.graph.validate_applied(&applied)?;
        }
        let desired = self.desired(&applied, target)?;

        let label = |id: &RevisionId| {
            self.graph
                .get(id.as_str())
                .map(|r| r.label.clone())
                .unwrap_or_else(|| "<unknown revision>".to_string())
        };
        let mut records: Vec<StepRecord> = applied
            .difference(&desired)
            .map(|id| StepRecord {
                revision: id.clone(),
                label: label(id),
                direction: Direction::Downgrade,
                duration_ms: 0,
            })
            .collect();
        records.extend(desired.difference(&applied).map(|id| StepRecord {
            revision: id.clone(),
            label: label(id),
            direction: Direction::Upgrade,
            duration_ms: 0,
        }));

        if self.config.dry_run || records.is_empty() {
            return Ok(RunResult {
                steps: records,
                heads: self.graph.heads_of(&desired),
                applied: desired,
                duration_ms: start.elapsed().as_millis() as u64,
                stopped: false,
                dry_run: self.config.dry_run,
            });
        }

        conn.begin().await?;
        for record in &records {
            let outcome = match record.direction {
                Direction::Upgrade => self.tracker.mark_applied(conn, &record.revision).await,
                Direction::Downgrade => self.tracker.mark_unapplied(conn, &record.revision).await,
            };
            if let Err(e) = outcome {
                rollback_quietly(conn).await;
                return Err(e);
            }
        }
        conn.commit().await?;

        info!(target = %target, changes = records.len(), "Version table stamped");
        Ok(RunResult {
            steps: records,
            heads: self.graph.heads_of(&desired),
            applied: desired,
            duration_ms: start.elapsed().as_millis() as u64,
            stopped: false,
            dry_run: false,
        })
    }

    /// Release a lock left behind by a crashed run.
    pub async fn force_unlock(&self, conn: &mut dyn Connection) -> MigrateResult<()> {
        warn!("Forcibly releasing the migration lock");
        conn.release_lock(&self.lock()).await
    }
}

async fn rollback_quietly(conn: &mut dyn Connection) {
    if let Err(e) = conn.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Dialect, Row};
    use crate::revision::{Revision, SqlScript};
    use crate::tracker::MemoryVersionTracker;
    use pretty_assertions::assert_eq;

    struct MockConnection {
        dialect: Dialect,
        log: Vec<String>,
        fail_on: Option<String>,
        lock_held: bool,
    }

    impl MockConnection {
        fn new(dialect: Dialect) -> Self {
            Self {
                dialect,
                log: Vec::new(),
                fail_on: None,
                lock_held: false,
            }
        }

        fn position(&self, entry: &str) -> usize {
            self.log
                .iter()
                .position(|l| l == entry)
                .unwrap_or_else(|| panic!("{entry} not in {:?}", self.log))
        }
    }

    #[async_trait::async_trait]
    impl Connection for MockConnection {
        fn dialect(&self) -> &Dialect {
            &self.dialect
        }

        async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
            if let Some(needle) = &self.fail_on {
                if sql.contains(needle.as_str()) {
                    return Err(MigrationError::database(format!("failed: {}", sql)));
                }
            }
            self.log.push(sql.to_string());
            Ok(())
        }

        async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
            self.log.push(sql.to_string());
            Ok(Vec::new())
        }

        async fn acquire_lock(&mut self, _lock: &MigrationLock) -> MigrateResult<()> {
            if self.lock_held {
                return Err(MigrationError::ConcurrentMigration("held".into()));
            }
            self.log.push("LOCK".into());
            Ok(())
        }

        async fn release_lock(&mut self, _lock: &MigrationLock) -> MigrateResult<()> {
            self.log.push("UNLOCK".into());
            Ok(())
        }
    }

    fn rev(id: &str, parents: &[&str], down: Option<&str>) -> Revision {
        Revision::new(
            RevisionId::new(id).unwrap(),
            parents.iter().map(|p| RevisionId::new(*p).unwrap()).collect(),
            format!("label {}", id),
            Arc::new(SqlScript::new(
                format!("UP {}", id),
                down.map(|d| d.to_string()),
            )),
        )
    }

    fn ids(list: &[&str]) -> BTreeSet<RevisionId> {
        list.iter().map(|id| RevisionId::new(*id).unwrap()).collect()
    }

    fn linear() -> RevisionGraph {
        RevisionGraph::new(vec![
            rev("aaa", &[], Some("DOWN aaa")),
            rev("bbb", &["aaa"], Some("DOWN bbb")),
        ])
        .unwrap()
    }

    fn runner(graph: RevisionGraph) -> MigrationRunner<MemoryVersionTracker> {
        MigrationRunner::new(MigrationConfig::new(), graph, MemoryVersionTracker::new())
    }

    async fn applied(
        runner: &MigrationRunner<MemoryVersionTracker>,
        conn: &mut MockConnection,
    ) -> BTreeSet<RevisionId> {
        runner.current(conn).await.unwrap()
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("head".parse::<Target>().unwrap(), Target::Head);
        assert_eq!("heads".parse::<Target>().unwrap(), Target::Heads);
        assert_eq!("base".parse::<Target>().unwrap(), Target::Base);
        assert_eq!("+2".parse::<Target>().unwrap(), Target::Relative(2));
        assert_eq!("-1".parse::<Target>().unwrap(), Target::Relative(-1));
        assert_eq!(
            "ae10".parse::<Target>().unwrap(),
            Target::Revision("ae10".into())
        );
        assert!("+x".parse::<Target>().is_err());
        assert_eq!(Target::Relative(3).to_string(), "+3");
    }

    #[tokio::test]
    async fn test_upgrade_from_base_to_head() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());

        let result = runner.run(&mut conn, &Target::Head).await.unwrap();

        assert_eq!(result.upgraded(), 2);
        assert_eq!(result.steps[0].revision.as_str(), "aaa");
        assert_eq!(result.steps[1].revision.as_str(), "bbb");
        assert_eq!(result.applied, ids(&["aaa", "bbb"]));
        assert_eq!(result.heads, vec![RevisionId::new("bbb").unwrap()]);

        assert_eq!(conn.log.first().map(String::as_str), Some("LOCK"));
        assert_eq!(conn.log.last().map(String::as_str), Some("UNLOCK"));
        assert!(conn.position("UP aaa") < conn.position("UP bbb"));
        assert_eq!(conn.log.iter().filter(|l| *l == "BEGIN").count(), 2);
        assert_eq!(conn.log.iter().filter(|l| *l == "COMMIT").count(), 2);
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());

        runner.run(&mut conn, &Target::Head).await.unwrap();
        let again = runner.run(&mut conn, &Target::Head).await.unwrap();

        assert!(!again.has_changes());
        assert_eq!(again.summary(), "Already at target");
        assert_eq!(conn.log.iter().filter(|l| *l == "UP aaa").count(), 1);
    }

    #[tokio::test]
    async fn test_downgrade_reverses_upgrade() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());

        let up = runner.run(&mut conn, &Target::Head).await.unwrap();
        let down = runner.run(&mut conn, &Target::Base).await.unwrap();

        let up_ids: Vec<_> = up.steps.iter().map(|s| s.revision.clone()).collect();
        let mut down_ids: Vec<_> = down.steps.iter().map(|s| s.revision.clone()).collect();
        down_ids.reverse();
        assert_eq!(up_ids, down_ids);
        assert_eq!(down.downgraded(), 2);
        assert!(down.applied.is_empty());
        assert!(conn.position("DOWN bbb") < conn.position("DOWN aaa"));
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back_and_resumes() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());
        conn.fail_on = Some("UP bbb".into());

        let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));
        assert_eq!(applied(&runner, &mut conn).await, ids(&["aaa"]));
        assert!(conn.log.contains(&"ROLLBACK".to_string()));
        assert_eq!(conn.log.last().map(String::as_str), Some("UNLOCK"));

        conn.fail_on = None;
        let result = runner.run(&mut conn, &Target::Head).await.unwrap();
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].revision.as_str(), "bbb");
    }

    #[tokio::test]
    async fn test_irreversible_downgrade_leaves_applied_set() {
        let graph = RevisionGraph::new(vec![
            rev("aaa", &[], Some("DOWN aaa")),
            rev("bbb", &["aaa"], None),
        ])
        .unwrap();
        let runner = runner(graph);
        let mut conn = MockConnection::new(Dialect::sqlite());

        runner.run(&mut conn, &Target::Head).await.unwrap();
        let err = runner.run(&mut conn, &Target::Base).await.unwrap_err();

        match err {
            MigrationError::Irreversible(id) => assert_eq!(id, "bbb"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(applied(&runner, &mut conn).await, ids(&["aaa", "bbb"]));
    }

    #[tokio::test]
    async fn test_multiple_heads_require_merge() {
        let graph = RevisionGraph::new(vec![
            rev("aaa", &[], None),
            rev("left", &["aaa"], None),
            rev("right", &["aaa"], None),
        ])
        .unwrap();
        let runner = runner(graph);
        let mut conn = MockConnection::new(Dialect::sqlite());

        let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
        assert!(matches!(err, MigrationError::MultipleHeads { .. }));
        assert!(applied(&runner, &mut conn).await.is_empty());

        let err = runner.run(&mut conn, &Target::Relative(2)).await.unwrap_err();
        assert!(matches!(err, MigrationError::AmbiguousRevision { .. }));

        let result = runner.run(&mut conn, &Target::Heads).await.unwrap();
        assert_eq!(result.upgraded(), 3);
        assert_eq!(result.heads.len(), 2);
    }

    #[tokio::test]
    async fn test_relative_targets() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());

        runner.run(&mut conn, &Target::Relative(1)).await.unwrap();
        assert_eq!(applied(&runner, &mut conn).await, ids(&["aaa"]));

        runner.run(&mut conn, &Target::Relative(1)).await.unwrap();
        runner.run(&mut conn, &Target::Relative(-1)).await.unwrap();
        assert_eq!(applied(&runner, &mut conn).await, ids(&["aaa"]));

        let err = runner.run(&mut conn, &Target::Relative(-2)).await.unwrap_err();
        assert!(matches!(err, MigrationError::UnreachableRevision { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let runner = MigrationRunner::new(
            MigrationConfig::new().dry_run(true),
            linear(),
            MemoryVersionTracker::new(),
        );
        let mut conn = MockConnection::new(Dialect::sqlite());

        let result = runner.run(&mut conn, &Target::Head).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.applied, ids(&["aaa", "bbb"]));
        assert!(conn.log.is_empty());
        assert!(result.summary().starts_with("[DRY RUN]"));
        assert!(applied(&runner, &mut conn).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_transactional_backend_records_after_ddl() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::mysql());

        runner.run(&mut conn, &Target::Relative(1)).await.unwrap();

        let up = conn.position("UP aaa");
        let begin = conn.position("BEGIN");
        assert!(up < begin);
        assert!(begin < conn.position("COMMIT"));
    }

    #[tokio::test]
    async fn test_single_transaction_mode() {
        let runner = MigrationRunner::new(
            MigrationConfig::new().transaction_per_step(false),
            linear(),
            MemoryVersionTracker::new(),
        );
        let mut conn = MockConnection::new(Dialect::postgres());

        runner.run(&mut conn, &Target::Head).await.unwrap();
        assert_eq!(conn.log.iter().filter(|l| *l == "BEGIN").count(), 1);
        assert!(conn.position("UP bbb") < conn.position("COMMIT"));
    }

    #[tokio::test]
    async fn test_stop_signal_halts_between_steps() {
        let runner = runner(linear());
        runner.stop_signal().stop();
        let mut conn = MockConnection::new(Dialect::sqlite());

        let result = runner.run(&mut conn, &Target::Head).await.unwrap();
        assert!(result.stopped);
        assert!(result.steps.is_empty());
        assert!(result.summary().contains("stopped early"));
    }

    #[tokio::test]
    async fn test_stamp_records_without_running() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());

        let result = runner.stamp(&mut conn, &Target::Head).await.unwrap();
        assert_eq!(result.steps.len(), 2);
        assert_eq!(applied(&runner, &mut conn).await, ids(&["aaa", "bbb"]));
        assert!(!conn.log.iter().any(|l| l.starts_with("UP")));

        runner
            .stamp(&mut conn, &Target::Revision("aa".into()))
            .await
            .unwrap();
        assert_eq!(applied(&runner, &mut conn).await, ids(&["aaa"]));
    }

    #[tokio::test]
    async fn test_held_lock_fails_fast() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());
        conn.lock_held = true;

        let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(conn.log.is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_pending() {
        let runner = runner(linear());
        let mut conn = MockConnection::new(Dialect::sqlite());

        runner.run(&mut conn, &Target::Relative(1)).await.unwrap();
        let status = runner.status(&mut conn).await.unwrap();

        assert_eq!(status.current_heads, vec![RevisionId::new("aaa").unwrap()]);
        assert_eq!(status.pending, vec![RevisionId::new("bbb").unwrap()]);
        assert!(!status.is_up_to_date());
    }

    #[tokio::test]
    async fn test_corrupt_applied_set_is_graph_error() {
        let runner = MigrationRunner::new(
            MigrationConfig::new(),
            linear(),
            MemoryVersionTracker::with_applied([RevisionId::new("bbb").unwrap()]),
        );
        let mut conn = MockConnection::new(Dialect::sqlite());

        let err = runner.run(&mut conn, &Target::Head).await.unwrap_err();
        assert!(matches!(err, MigrationError::Graph(_)));
    }
}
