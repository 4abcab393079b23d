//! PostgreSQL connection configuration.

use std::time::Duration;

use crate::error::{PgError, PgResult};

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Host.
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Username.
    pub user: String,
    /// Password.
    pub password: Option<String>,
    /// SSL mode.
    pub ssl_mode: SslMode,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Statement timeout applied to the session.
    pub statement_timeout: Option<Duration>,
    /// How long DDL waits for table locks before failing.
    pub lock_timeout: Option<Duration>,
    /// Application name (shown in pg_stat_activity).
    pub application_name: String,
}

/// SSL mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Disable SSL.
    Disable,
    /// Prefer SSL but allow non-SSL.
    #[default]
    Prefer,
    /// Require SSL.
    Require,
}

impl PgConfig {
    /// Create a new configuration from a database URL.
    pub fn from_url(url: impl AsRef<str>) -> PgResult<Self> {
        let parsed = url::Url::parse(url.as_ref())
            .map_err(|e| PgError::config(format!("invalid database URL: {}", e)))?;

        if parsed.scheme() != "postgresql" && parsed.scheme() != "postgres" {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| PgError::config("missing host in URL"))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }

        let mut config = Self::builder()
            .host(host)
            .port(parsed.port().unwrap_or(5432))
            .database(database);

        if !parsed.username().is_empty() {
            config = config.user(parsed.username());
        }
        if let Some(password) = parsed.password() {
            config = config.password(password);
        }

        for (key, value) in parsed.query_pairs() {
            let value_str: &str = &value;
            config = match &*key {
                "sslmode" => config.ssl_mode(match value_str {
                    "disable" => SslMode::Disable,
                    "prefer" => SslMode::Prefer,
                    "require" => SslMode::Require,
                    other => {
                        return Err(PgError::config(format!("invalid sslmode: {}", other)));
                    }
                }),
                "connect_timeout" => config.connect_timeout(Duration::from_secs(
                    value_str
                        .parse()
                        .map_err(|_| PgError::config("invalid connect_timeout"))?,
                )),
                "statement_timeout" => config.statement_timeout(Duration::from_millis(
                    value_str
                        .parse()
                        .map_err(|_| PgError::config("invalid statement_timeout"))?,
                )),
                "lock_timeout" => config.lock_timeout(Duration::from_millis(
                    value_str
                        .parse()
                        .map_err(|_| PgError::config("invalid lock_timeout"))?,
                )),
                "application_name" => config.application_name(value_str),
                _ => config,
            };
        }

        config.build()
    }

    /// Create a builder for configuration.
    pub fn builder() -> PgConfigBuilder {
        PgConfigBuilder::new()
    }

    /// Convert to tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.dbname(&self.database);
        config.user(&self.user);

        if let Some(ref password) = self.password {
            config.password(password);
        }

        config.application_name(&self.application_name);
        config.connect_timeout(self.connect_timeout);

        config
    }

    /// Session settings issued right after connecting.
    pub fn session_sql(&self) -> Option<String> {
        let mut stmts = Vec::new();
        if let Some(timeout) = self.statement_timeout {
            stmts.push(format!("SET statement_timeout = {}", timeout.as_millis()));
        }
        if let Some(timeout) = self.lock_timeout {
            stmts.push(format!("SET lock_timeout = {}", timeout.as_millis()));
        }
        (!stmts.is_empty()).then(|| stmts.join("; "))
    }
}

/// Builder for PostgreSQL configuration.
#[derive(Debug, Default)]
pub struct PgConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    ssl_mode: Option<SslMode>,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    lock_timeout: Option<Duration>,
    application_name: Option<String>,
}

impl PgConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the statement timeout.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Set the lock timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PgResult<PgConfig> {
        let database = self
            .database
            .ok_or_else(|| PgError::config("database name is required"))?;

        Ok(PgConfig {
            host: self.host.unwrap_or_else(|| "localhost".to_string()),
            port: self.port.unwrap_or(5432),
            database,
            user: self.user.unwrap_or_else(|| "postgres".to_string()),
            password: self.password,
            ssl_mode: self.ssl_mode.unwrap_or_default(),
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(30)),
            statement_timeout: self.statement_timeout,
            lock_timeout: self.lock_timeout,
            application_name: self
                .application_name
                .unwrap_or_else(|| "stratum".to_string()),
        })
    }
}
