//! Error types for the migration engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed revision script metadata.
    #[error("Invalid revision script at {}: {message}", .path.display())]
    Parse {
        /// Path of the offending script directory or file.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// Corrupt or disconnected revision graph.
    #[error("Revision graph error: {0}")]
    Graph(String),

    /// `head` was requested while the graph has several heads.
    #[error(
        "Multiple heads are present ({}); specify a target revision or run `stratum merge` to join them",
        .heads.join(", ")
    )]
    MultipleHeads {
        /// The competing head revisions.
        heads: Vec<String>,
    },

    /// A revision specifier matches more than one candidate.
    #[error(
        "Revision specifier '{spec}' is ambiguous; candidates: {}",
        .candidates.join(", ")
    )]
    AmbiguousRevision {
        /// The specifier as given by the caller.
        spec: String,
        /// Every revision the specifier could mean.
        candidates: Vec<String>,
    },

    /// The target cannot be reached from the current position.
    #[error("Revision '{to}' is not reachable from '{from}': {reason}")]
    UnreachableRevision {
        /// Current position (revision ids or `base`).
        from: String,
        /// Requested target.
        to: String,
        /// Remedial explanation.
        reason: String,
    },

    /// A downgrade procedure is intentionally unimplemented.
    #[error("Revision '{0}' is irreversible: it has no downgrade procedure")]
    Irreversible(String),

    /// A batch table rebuild cannot be applied.
    #[error("Batch operation on table '{table}' failed: {message}")]
    BatchOperation {
        /// Target table.
        table: String,
        /// Reason the batch was rejected.
        message: String,
    },

    /// Another migration run holds the lock.
    #[error("Another migration is in progress ({0}); retry once it has finished")]
    ConcurrentMigration(String),

    /// The backend cannot perform the requested operation.
    #[error("Backend '{backend}' does not support {operation}{}", .hint.as_deref().map(|h| format!("; {}", h)).unwrap_or_default())]
    BackendCapability {
        /// Backend name.
        backend: String,
        /// The unsupported operation.
        operation: String,
        /// Optional remediation.
        hint: Option<String>,
    },

    /// Revision not found.
    #[error("Revision '{0}' not found")]
    NotFound(String),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Create a parse error for a script path.
    pub fn parse(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a graph error.
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    /// Create an ambiguous revision error.
    pub fn ambiguous<I, S>(spec: impl Into<String>, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AmbiguousRevision {
            spec: spec.into(),
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an unreachable revision error.
    pub fn unreachable(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnreachableRevision {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Create a batch operation error.
    pub fn batch(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BatchOperation {
            table: table.into(),
            message: msg.into(),
        }
    }

    /// Create a backend capability error.
    pub fn capability(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::BackendCapability {
            backend: backend.into(),
            operation: operation.into(),
            hint: None,
        }
    }

    /// Attach a remediation hint to a capability error.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        match self {
            Self::BackendCapability {
                backend, operation, ..
            } => Self::BackendCapability {
                backend,
                operation,
                hint: Some(hint.into()),
            },
            other => other,
        }
    }

    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors raised while loading scripts, before anything touches the database.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Graph(_))
    }

    /// Errors that require the caller to say which revision they meant.
    pub fn is_disambiguation(&self) -> bool {
        matches!(
            self,
            Self::MultipleHeads { .. } | Self::AmbiguousRevision { .. }
        )
    }

    /// Errors a caller may resolve by simply retrying later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConcurrentMigration(_))
    }
}
