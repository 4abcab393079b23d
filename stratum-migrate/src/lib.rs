//! # stratum-migrate
//!
//! Migration engine for Stratum.
//!
//! This crate provides:
//! - A **revision graph**: revisions with parent links, validated to be
//!   acyclic with a single root, supporting branches and merge revisions
//! - A **script repository** that loads revisions from a directory (plus
//!   procedures registered in Rust code) and creates new revision scripts
//! - A **version tracker** persisting the applied set in the target database
//! - A **runner** that plans and executes the steps between the applied set
//!   and a target, one transaction per step, under a migration lock
//! - **Operations** for scripts, including batch table rebuilds for backends
//!   with limited `ALTER TABLE` support
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐     ┌────────────────┐     ┌────────────────┐
//! │ Script Repository │────▶│ Revision Graph │────▶│ Runner (plan)  │
//! └───────────────────┘     └────────────────┘     └────────────────┘
//!                                                          │
//!                           ┌────────────────┐             ▼
//!                           │ Version Tracker│◀────┌────────────────┐
//!                           └────────────────┘     │ Operations     │
//!                                                  └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum_migrate::{MigrationConfig, MigrationRunner, ScriptRepository, TableVersionTracker, Target};
//!
//! async fn upgrade(conn: &mut dyn stratum_migrate::Connection) -> stratum_migrate::MigrateResult<()> {
//!     let repository = ScriptRepository::new("./migrations");
//!     let graph = repository.load().await?;
//!
//!     let runner = MigrationRunner::new(MigrationConfig::new(), graph, TableVersionTracker::default());
//!     let result = runner.run(conn, &Target::Head).await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Revision Scripts
//!
//! Each revision lives in its own directory:
//!
//! ```text
//! migrations/
//! ├── 3f2a9c1b7d4e_create_users/
//! │   ├── revision.toml      # id, label, parent, merge_parents, create_date
//! │   ├── up.sql
//! │   └── down.sql           # absent for irreversible revisions
//! └── 9b1c04e2aa31_add_email/
//!     ├── revision.toml
//!     └── up.sql
//! ```
//!
//! Procedures that need more than SQL implement [`MigrationScript`] and are
//! attached through a [`ScriptRegistry`].

pub mod batch;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod graph;
pub mod lock;
pub mod logging;
pub mod ops;
pub mod registry;
pub mod revision;
pub mod runner;
pub mod script;
pub mod tracker;

// Re-exports
pub use batch::{BatchAlterTable, BatchOp, Recreate};
pub use connection::{Connection, Dialect, Row, row_bool, row_i64, row_str};
pub use ddl::{AlterColumn, Column, ForeignKey, Index, SqlRenderer, Table, TableSchema};
pub use error::{MigrateResult, MigrationError};
pub use graph::{BASE, HEAD, RevisionGraph};
pub use lock::MigrationLock;
pub use ops::Operations;
pub use registry::{RevisionSpec, ScriptRegistry};
pub use revision::{Direction, MigrationScript, Revision, RevisionId, SqlScript, Step};
pub use runner::{
    MigrationConfig, MigrationRunner, MigrationStatus, RunResult, StepRecord, StopSignal, Target,
};
pub use script::{RevisionMetadata, ScriptRepository};
pub use tracker::{
    DEFAULT_VERSION_TABLE, MemoryVersionTracker, TableVersionTracker, VersionRecord,
    VersionTracker,
};
