//! # Configuration
//!
//! Plain configuration structs with sensible defaults and consuming setters.
//! All of them deserialize with `serde`, so they can be embedded in a larger
//! application config file.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// HTTP Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Set the bind address
    #[must_use]
    pub const fn address(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the graceful shutdown timeout
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set max request body size
    #[must_use]
    pub const fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }
}

/// How the dispatcher reports validation failures
///
/// Chosen explicitly per deployment; never inferred from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Turn failures into a 422 `ValidationFailure` outcome
    #[default]
    Respond,
    /// Return failures as `Err(Error::Validation)` for the caller to inspect
    Raise,
}

/// Supported database drivers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// SQLite file or in-memory database
    #[default]
    Sqlite,
    /// PostgreSQL server
    Postgres,
}

impl Driver {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "pgsql" | "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Settings for one named connection profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Driver to connect with
    pub driver: Driver,
    /// Server host (ignored by SQLite)
    pub host: String,
    /// Server port (ignored by SQLite)
    pub port: u16,
    /// Database name, or file path / `:memory:` for SQLite
    pub database: String,
    /// Login user (ignored by SQLite)
    pub username: String,
    /// Login password (ignored by SQLite)
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Sqlite,
            host: "127.0.0.1".to_string(),
            port: 5432,
            database: ":memory:".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ConnectionConfig {
    /// In-memory SQLite profile
    #[must_use]
    pub fn sqlite_memory() -> Self {
        Self::default()
    }

    /// SQLite profile backed by a file
    #[must_use]
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            database: path.into(),
            ..Self::default()
        }
    }

    /// PostgreSQL profile
    #[must_use]
    pub fn postgres(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver: Driver::Postgres,
            host: host.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Set login credentials
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the server port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connection URL understood by `Database::connect`
    #[must_use]
    pub fn dsn(&self) -> String {
        match self.driver {
            Driver::Sqlite if self.database.is_empty() || self.database == ":memory:" => {
                "sqlite::memory:".to_string()
            }
            Driver::Sqlite => format!("sqlite:{}", self.database),
            Driver::Postgres => {
                let auth = match (self.username.is_empty(), self.password.is_empty()) {
                    (true, _) => String::new(),
                    (false, true) => format!("{}@", self.username),
                    (false, false) => format!("{}:{}@", self.username, self.password),
                };
                format!(
                    "postgres://{auth}{}:{}/{}",
                    self.host, self.port, self.database
                )
            }
        }
    }
}

/// Named connection profiles plus the default profile name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Profile used when no name is given
    pub default: String,
    /// Profiles by name
    pub connections: IndexMap<String, ConnectionConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let mut connections = IndexMap::new();
        connections.insert("testing".to_string(), ConnectionConfig::sqlite_memory());
        Self {
            default: "testing".to_string(),
            connections,
        }
    }
}

impl DatabaseConfig {
    /// Add or replace a profile
    #[must_use]
    pub fn connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Set the default profile name
    #[must_use]
    pub fn default_connection(mut self, name: impl Into<String>) -> Self {
        self.default = name.into();
        self
    }

    /// Build from `DB_*` environment variables
    ///
    /// Loads `.env` first when present. `DB_CONNECTION` names the default
    /// profile (default `primary`), the remaining variables describe it.
    /// An in-memory `testing` profile is always present.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = ConnectionConfig::default();

        let default = var("DB_CONNECTION").unwrap_or_else(|| "primary".to_string());
        let primary = ConnectionConfig {
            driver: var("DB_DRIVER")
                .and_then(|d| Driver::parse(&d))
                .unwrap_or_default(),
            host: var("DB_HOST").unwrap_or(defaults.host),
            port: var("DB_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database: var("DB_DATABASE").unwrap_or(defaults.database),
            username: var("DB_USERNAME").unwrap_or_default(),
            password: var("DB_PASSWORD").unwrap_or_default(),
        };

        let mut config = Self::default();
        if default != "testing" {
            config.connections.insert(default.clone(), primary);
        }
        config.default = default;
        config
    }
}
