//! SQLite backend for Stratum migrations.
//!
//! This crate implements [`stratum_migrate::Connection`] on top of
//! `tokio-rusqlite`.
//!
//! # Features
//!
//! - Transactional DDL: every revision commits or rolls back as a unit
//! - Table introspection for batch rebuilds (`ALTER` support in SQLite is limited)
//! - Migration locking through a lock table
//! - In-memory and file-based databases
//!
//! # Example
//!
//! ```rust,ignore
//! use stratum_migrate::{MigrationConfig, MigrationRunner, ScriptRepository, TableVersionTracker, Target};
//! use stratum_sqlite::SqliteConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = SqliteConnection::connect("sqlite://./app.db").await?;
//!     let graph = ScriptRepository::new("./migrations").load().await?;
//!
//!     let runner = MigrationRunner::new(MigrationConfig::new(), graph, TableVersionTracker::default());
//!     runner.run(&mut conn, &Target::Head).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
mod introspect;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
