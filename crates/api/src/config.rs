use std::str::FromStr;
use std::time::Duration;

use cadence_core::engine::EngineConfig;

use crate::auth::jwt::{JwtConfig, DEFAULT_ACCESS_EXPIRY_MINS};

/// Raised when an environment variable is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in the environment")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Log output format, selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" | "" => Ok(Self::Pretty),
            _ => Err(()),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// Everything except the database URL and JWT secret has a default suitable
/// for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Grace period for in-flight requests on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Upper bound on one entity snapshot fetch (default: `5`).
    pub entity_fetch_timeout_secs: u64,
    /// Retries when an instance was modified concurrently (default: `3`).
    pub conflict_retries: u32,
    /// `type:table` pairs readable by the entity accessor.
    pub entity_tables: String,
    pub log_format: LogFormat,
}

/// Default `ENTITY_TABLES` mapping.
pub const DEFAULT_ENTITY_TABLES: &str = "post:posts,campaign:campaigns";

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `HOST`                      | `0.0.0.0`                        |
    /// | `PORT`                      | `3000`                           |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`          |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                             |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                             |
    /// | `DATABASE_URL`              | required                         |
    /// | `JWT_SECRET`                | required                         |
    /// | `JWT_ACCESS_EXPIRY_MINS`    | `15`                             |
    /// | `ENTITY_FETCH_TIMEOUT_SECS` | `5`                              |
    /// | `ENGINE_CONFLICT_RETRIES`   | `3`                              |
    /// | `ENTITY_TABLES`             | `post:posts,campaign:campaigns`  |
    /// | `LOG_FORMAT`                | `pretty`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &'static str, default: &str| {
            lookup(name).unwrap_or_else(|| default.to_string())
        };
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let cors_origins = var("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port: parse("PORT", var("PORT", "3000"))?,
            cors_origins,
            request_timeout_secs: parse("REQUEST_TIMEOUT_SECS", var("REQUEST_TIMEOUT_SECS", "30"))?,
            shutdown_timeout_secs: parse(
                "SHUTDOWN_TIMEOUT_SECS",
                var("SHUTDOWN_TIMEOUT_SECS", "30"),
            )?,
            database_url: required("DATABASE_URL")?,
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
                access_token_expiry_mins: parse(
                    "JWT_ACCESS_EXPIRY_MINS",
                    var("JWT_ACCESS_EXPIRY_MINS", &DEFAULT_ACCESS_EXPIRY_MINS.to_string()),
                )?,
            },
            entity_fetch_timeout_secs: parse(
                "ENTITY_FETCH_TIMEOUT_SECS",
                var("ENTITY_FETCH_TIMEOUT_SECS", "5"),
            )?,
            conflict_retries: parse(
                "ENGINE_CONFLICT_RETRIES",
                var("ENGINE_CONFLICT_RETRIES", "3"),
            )?,
            entity_tables: var("ENTITY_TABLES", DEFAULT_ENTITY_TABLES),
            log_format: parse("LOG_FORMAT", var("LOG_FORMAT", "pretty"))?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            entity_fetch_timeout: Duration::from_secs(self.entity_fetch_timeout_secs),
            conflict_retries: self.conflict_retries,
        }
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}
