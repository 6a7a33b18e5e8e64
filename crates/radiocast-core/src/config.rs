//! Configuration management for the Radiocast server
//!
//! Settings come from a JSON configuration file (`radiocast.json` by
//! default) layered with `RADIOCAST`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Listener session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Call search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Downstream forwarding configuration
    #[serde(default)]
    pub downstream: DownstreamConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Branding string sent in `VER` replies
    #[serde(default = "default_branding")]
    pub branding: String,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

/// Database configuration
///
/// `dialect` selects one of `sqlite`, `mariadb`, `mysql` or `postgresql`;
/// the connection fields that apply depend on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQL dialect
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Database file path (sqlite only)
    #[serde(default = "default_db_file")]
    pub file: String,

    /// Database host (mysql/mariadb/postgresql)
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port; 0 picks the dialect default
    #[serde(default)]
    pub port: u16,

    /// Database user
    #[serde(default)]
    pub username: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Maximum connection lifetime in seconds
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime: u64,
}

/// Listener session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Outbound frames buffered per session before the session is dropped
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Seconds between listener-count broadcasts and expiry sweeps
    #[serde(default = "default_ticker_interval")]
    pub ticker_interval: u64,
}

/// Call search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hard cap on a single result page
    #[serde(default = "default_max_results")]
    pub max_results: i64,
}

/// Downstream forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamConfig {
    /// Concurrent forwarding workers
    #[serde(default = "default_forward_workers")]
    pub workers: usize,

    /// Pending forwards buffered before the oldest is dropped
    #[serde(default = "default_forward_queue")]
    pub queue_size: usize,

    /// Retries per forward before giving up
    #[serde(default = "default_forward_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles per attempt
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Retry delay ceiling in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Seconds granted to in-flight forwards during shutdown
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json or text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_branding() -> String {
    "Radiocast".to_string()
}

const fn default_max_upload_size() -> u64 {
    50_000_000
}

fn default_dialect() -> String {
    "sqlite".to_string()
}

fn default_db_file() -> String {
    "radiocast.db".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_name() -> String {
    "radiocast".to_string()
}

const fn default_max_connections() -> u32 {
    25
}

const fn default_max_lifetime() -> u64 {
    60
}

const fn default_queue_depth() -> usize {
    64
}

const fn default_ticker_interval() -> u64 {
    5
}

const fn default_max_results() -> i64 {
    500
}

const fn default_forward_workers() -> usize {
    4
}

const fn default_forward_queue() -> usize {
    64
}

const fn default_forward_retries() -> u32 {
    5
}

const fn default_retry_base_delay() -> u64 {
    1_000
}

const fn default_retry_max_delay() -> u64 {
    32_000
}

const fn default_flush_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            branding: default_branding(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            file: default_db_file(),
            host: default_db_host(),
            port: 0,
            username: String::new(),
            password: String::new(),
            name: default_db_name(),
            max_connections: default_max_connections(),
            max_lifetime: default_max_lifetime(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            ticker_interval: default_ticker_interval(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            workers: default_forward_workers(),
            queue_size: default_forward_queue(),
            max_retries: default_forward_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from `radiocast.json` and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or parsed.
    pub fn load() -> crate::Result<Self> {
        Self::build(config::File::with_name("radiocast").required(false))
    }

    /// Load configuration from an explicit file path
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        Self::build(config::File::from(path))
    }

    fn build(file: config::File<config::FileSourceFile, config::FileFormat>) -> crate::Result<Self> {
        let config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("RADIOCAST").separator("_"))
            .build()
            .map_err(|e| crate::Error::Configuration {
                message: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| crate::Error::Configuration {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.branding, "Radiocast");

        assert_eq!(config.database.dialect, "sqlite");
        assert_eq!(config.database.file, "radiocast.db");
        assert_eq!(config.database.max_connections, 25);
        assert_eq!(config.database.max_lifetime, 60);

        assert_eq!(config.session.queue_depth, 64);
        assert_eq!(config.session.ticker_interval, 5);
        assert_eq!(config.search.max_results, 500);

        assert_eq!(config.downstream.max_retries, 5);
        assert_eq!(config.downstream.retry_base_delay_ms, 1_000);
        assert_eq!(config.downstream.retry_max_delay_ms, 32_000);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_partial_config_deserialization() {
        let json_str = r#"{
            "server": {"host": "127.0.0.1", "port": 8081, "branding": "Metro Scanner"},
            "database": {"dialect": "postgresql", "host": "db.local", "username": "rc", "password": "secret"}
        }"#;

        let config: Config = serde_json::from_str(json_str).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.branding, "Metro Scanner");
        assert_eq!(config.database.dialect, "postgresql");
        assert_eq!(config.database.host, "db.local");
        assert_eq!(config.database.name, "radiocast");
        assert_eq!(config.session.queue_depth, 64);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.server.port, config.server.port);
        assert_eq!(deserialized.database.dialect, config.database.dialect);
        assert_eq!(
            deserialized.downstream.queue_size,
            config.downstream.queue_size
        );
    }
}
