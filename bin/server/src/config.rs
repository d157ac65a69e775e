//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables. Nested keys
//! use a double underscore, e.g. `KEYCLOAK__SERVER_URL` or
//! `CLICKHOUSE__URL`.
//!
//! See [`OidcConfig`](gist_analytics_platform_access::OidcConfig) for
//! Keycloak configuration.

use gist_analytics_platform_access::OidcConfig;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::StartupError;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Keycloak sign-in configuration.
    pub keycloak: OidcConfig,

    /// ClickHouse connection.
    pub clickhouse: ClickHouseConfig,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// ClickHouse HTTP interface settings.
#[derive(Clone, Deserialize)]
pub struct ClickHouseConfig {
    /// Base URL of the HTTP interface (e.g., "http://clickhouse:8123").
    pub url: String,

    /// Database holding the event tables.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Per-query timeout in seconds.
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,
}

fn default_database() -> String {
    "default".to_string()
}

fn default_query_timeout_seconds() -> u64 {
    30
}

impl ClickHouseConfig {
    /// Returns the per-query timeout.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

impl fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("query_timeout_seconds", &self.query_timeout_seconds)
            .finish()
    }
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions unused for this many minutes are dropped.
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_idle_minutes() -> i64 {
    60
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_minutes: default_idle_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl SessionConfig {
    /// Returns the idle TTL.
    #[must_use]
    pub fn idle_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.idle_minutes)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Checks values the deserializer cannot.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), StartupError> {
        self.keycloak
            .validate()
            .map_err(|e| StartupError::Config {
                details: e.to_string(),
            })?;

        if self.clickhouse.url.trim().is_empty() {
            return Err(StartupError::Config {
                details: "clickhouse.url must be set".to_string(),
            });
        }
        if self.clickhouse.query_timeout_seconds == 0 {
            return Err(StartupError::Config {
                details: "clickhouse.query_timeout_seconds must be positive".to_string(),
            });
        }
        if self.session.idle_minutes <= 0 {
            return Err(StartupError::Config {
                details: "session.idle_minutes must be positive".to_string(),
            });
        }
        if self.session.cleanup_interval_seconds == 0 {
            return Err(StartupError::Config {
                details: "session.cleanup_interval_seconds must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clickhouse() -> ClickHouseConfig {
        ClickHouseConfig {
            url: "http://clickhouse:8123".into(),
            database: default_database(),
            user: Some("dashboard".into()),
            password: Some("hunter2".into()),
            query_timeout_seconds: default_query_timeout_seconds(),
        }
    }

    fn config() -> ServerConfig {
        ServerConfig {
            listen_addr: default_listen_addr(),
            keycloak: OidcConfig::new(
                "https://sso.example.com".into(),
                "gist".into(),
                "gist-dashboard".into(),
            ),
            clickhouse: clickhouse(),
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn session_config_has_correct_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_minutes, 60);
        assert_eq!(config.cleanup_interval_seconds, 300);
        assert!(config.secure_cookies);
        assert_eq!(config.idle_ttl(), chrono::Duration::minutes(60));
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rejects_zero_idle_time() {
        let mut config = config();
        config.session.idle_minutes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_minutes"));
    }

    #[test]
    fn rejects_blank_clickhouse_url() {
        let mut config = config();
        config.clickhouse.url = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn clickhouse_debug_redacts_password() {
        let debug = format!("{:?}", clickhouse());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
