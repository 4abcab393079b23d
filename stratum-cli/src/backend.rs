//! Backend selection by database URL scheme.

use stratum_migrate::{Connection, MigrationError};

use crate::error::{CliError, CliResult};

/// Database backends the CLI knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite file or in-memory database
    Sqlite,
    /// PostgreSQL server
    Postgres,
    /// MySQL server
    Mysql,
}

impl Backend {
    /// Pick the backend for a URL.
    pub fn from_url(url: &str) -> CliResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" | "file" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            _ => Err(CliError::Config(format!(
                "unsupported database URL scheme '{}'; expected sqlite:, postgres:// or mysql://",
                scheme
            ))),
        }
    }

    /// Cargo feature that enables this backend.
    pub fn feature(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    fn not_compiled(&self) -> CliError {
        CliError::Config(format!(
            "this build has no {} support; rebuild stratum-cli with the '{}' feature",
            self.feature(),
            self.feature()
        ))
    }
}

/// Open a connection for `url`.
pub async fn connect(url: &str) -> CliResult<Box<dyn Connection>> {
    let backend = Backend::from_url(url)?;
    tracing::debug!(backend = backend.feature(), "Connecting");

    match backend {
        #[cfg(feature = "sqlite")]
        Backend::Sqlite => {
            let conn = stratum_sqlite::SqliteConnection::connect(url)
                .await
                .map_err(MigrationError::from)?;
            Ok(Box::new(conn))
        }
        #[cfg(feature = "postgres")]
        Backend::Postgres => {
            let conn = stratum_postgres::PgConnection::connect(url)
                .await
                .map_err(MigrationError::from)?;
            Ok(Box::new(conn))
        }
        #[cfg(feature = "mysql")]
        Backend::Mysql => {
            let conn = stratum_mysql::MysqlConnection::connect(url)
                .await
                .map_err(MigrationError::from)?;
            Ok(Box::new(conn))
        }
        #[allow(unreachable_patterns)]
        other => Err(other.not_compiled()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(Backend::from_url("sqlite::memory:").unwrap(), Backend::Sqlite);
        assert_eq!(Backend::from_url("sqlite://app.db").unwrap(), Backend::Sqlite);
        assert_eq!(
            Backend::from_url("postgresql://localhost/app").unwrap(),
            Backend::Postgres
        );
        assert_eq!(Backend::from_url("mysql://localhost/app").unwrap(), Backend::Mysql);
        assert!(Backend::from_url("mongodb://localhost/app").is_err());
    }
}
