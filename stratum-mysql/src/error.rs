//! Error types for MySQL operations.

use std::fmt;

use stratum_migrate::MigrationError;

/// Result type for MySQL operations.
pub type MysqlResult<T> = Result<T, MysqlError>;

/// Error type for MySQL operations.
#[derive(Debug)]
pub enum MysqlError {
    /// MySQL driver error.
    Mysql(mysql_async::Error),
    /// Configuration error.
    Config(String),
    /// Introspection returned something a rebuild cannot reproduce.
    Introspection(String),
}

impl MysqlError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an introspection error.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Server error code, if the server rejected a statement.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Mysql(mysql_async::Error::Server(e)) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for MysqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mysql(e) => write!(f, "MySQL error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Introspection(msg) => write!(f, "Introspection error: {}", msg),
        }
    }
}

impl std::error::Error for MysqlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Mysql(e) => Some(e),
            _ => None,
        }
    }
}

impl From<mysql_async::Error> for MysqlError {
    fn from(err: mysql_async::Error) -> Self {
        Self::Mysql(err)
    }
}

impl From<MysqlError> for MigrationError {
    fn from(err: MysqlError) -> Self {
        match err {
            MysqlError::Config(msg) => MigrationError::config(msg),
            other => MigrationError::database(other.to_string()),
        }
    }
}
