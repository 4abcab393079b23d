//! # Stratum
//!
//! Revision-graph schema migrations for Rust.
//!
//! Stratum keeps a database schema in step with an ordered set of revision
//! scripts:
//! - Revisions form a graph with one base; branches are joined by merge revisions
//! - A version table records the applied set, so interrupted runs resume
//! - Each revision runs in its own transaction where the backend allows it
//! - Batch mode rebuilds tables on backends with limited `ALTER TABLE`
//! - A migration lock keeps concurrent runs from interleaving
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stratum::prelude::*;
//! use stratum::sqlite::SqliteConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = SqliteConnection::connect("sqlite://app.db").await?;
//!     let graph = ScriptRepository::new("migrations").load().await?;
//!
//!     let runner = MigrationRunner::new(MigrationConfig::new(), graph, TableVersionTracker::default());
//!     let result = runner.run(&mut conn, &Target::Head).await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The migration engine: revision graph, runner, trackers and operations.
pub mod migrate {
    pub use stratum_migrate::*;
}

/// SQLite backend.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use stratum_sqlite::*;
}

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use stratum_postgres::*;
}

/// MySQL backend.
#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub mod mysql {
    pub use stratum_mysql::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use stratum_migrate::{
        AlterColumn, Column, Connection, Direction, ForeignKey, Index, MigrateResult,
        MigrationConfig, MigrationError, MigrationRunner, MigrationScript, Operations,
        RevisionGraph, RevisionId, RevisionSpec, RunResult, ScriptRegistry, ScriptRepository,
        StopSignal, Table, TableVersionTracker, Target, VersionTracker,
    };
}

// Re-export key types at the crate root
pub use stratum_migrate::{MigrateResult, MigrationError};
