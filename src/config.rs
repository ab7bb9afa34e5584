/*!
 * Configuration types for nodes and their connection pools
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{NodeError, Result};

/// Default max size for a node's connection pool
pub const POOL_SIZE: usize = 5;

/// Default seconds a caller waits to check a connection out of the pool
pub const POOL_TIMEOUT: f64 = 0.5;

/// Default seconds allowed for establishing a connection
pub const CONNECTION_TIMEOUT: f64 = 5.0;

/// Options bundle for a single node
///
/// Durations are expressed in fractional seconds. Keys other than the ones
/// named here are kept verbatim in `extra` and handed to the connector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeOptions {
    /// Maximum number of pooled connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,

    /// Checkout timeout for the pool, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_timeout: Option<f64>,

    /// Connection timeout, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// Connector-specific options passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs_f64());
        self
    }

    /// Attach a connector-specific option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Pool size, falling back to [`POOL_SIZE`]
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(POOL_SIZE)
    }

    /// Pool checkout timeout, falling back to [`POOL_TIMEOUT`]
    pub fn pool_timeout(&self) -> Duration {
        seconds_or(self.pool_timeout, POOL_TIMEOUT)
    }

    /// Connection timeout, falling back to [`CONNECTION_TIMEOUT`]
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout, CONNECTION_TIMEOUT)
    }

    /// Look up a passthrough option
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.extra.get(key)
    }

    /// Reject values no pool or connector can honor
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == Some(0) {
            return Err(NodeError::Config("pool_size must be at least 1".to_string()));
        }
        for (key, value) in [("pool_timeout", self.pool_timeout), ("timeout", self.timeout)] {
            if let Some(secs) = value {
                if Duration::try_from_secs_f64(secs).is_err() {
                    return Err(NodeError::Config(format!(
                        "{key} must be a representable non-negative number of seconds, got {secs}"
                    )));
                }
            }
        }
        Ok(())
    }
}

// Values `validate` would reject fall back to the default
fn seconds_or(value: Option<f64>, default: f64) -> Duration {
    value
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging setup
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level emitted
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Force debug level regardless of `level`
    #[serde(default)]
    pub verbose: bool,
}

impl LoggingConfig {
    /// Level actually applied once `verbose` is taken into account
    pub fn effective_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else {
            self.level.to_tracing_level()
        }
    }
}

/// Top-level configuration for one node
///
/// ```toml
/// address = "db1.internal:27017"
///
/// [options]
/// pool_size = 3
/// pool_timeout = 0.1
/// tcp_nodelay = false
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `host:port` of the remote node
    pub address: String,

    #[serde(default)]
    pub options: NodeOptions,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            options: NodeOptions::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(contents)
            .map_err(|e| NodeError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.options.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_when_options_omitted() {
        let options = NodeOptions::default();
        assert_eq!(options.pool_size(), 5);
        assert_eq!(options.pool_timeout(), Duration::from_millis(500));
        assert_eq!(options.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_explicit_options_override_defaults() {
        let options = NodeOptions::new()
            .with_pool_size(3)
            .with_pool_timeout(Duration::from_millis(100));
        assert_eq!(options.pool_size(), 3);
        assert_eq!(options.pool_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_timeout_falls_back_to_default() {
        let options = NodeOptions {
            pool_timeout: Some(-1.0),
            timeout: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(options.pool_timeout(), Duration::from_millis(500));
        assert_eq!(options.timeout(), Duration::from_secs(5));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_timeout_rejected() {
        let options = NodeOptions {
            pool_timeout: Some(1e20),
            ..Default::default()
        };
        assert_eq!(options.pool_timeout(), Duration::from_millis(500));
        assert!(matches!(options.validate(), Err(NodeError::Config(_))));

        let err = NodeConfig::from_toml_str(
            r#"
            address = "db1.internal"

            [options]
            pool_timeout = 1e20
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, NodeError::Config(ref message) if message.contains("pool_timeout")));
    }

    #[test]
    fn test_large_but_representable_timeout_accepted() {
        let options = NodeOptions {
            timeout: Some(1e19),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.timeout().as_secs(), 10_000_000_000_000_000_000);
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let options = NodeOptions::new().with_pool_size(0);
        assert!(matches!(options.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn test_parse_toml_with_passthrough_options() {
        let config = NodeConfig::from_toml_str(
            r#"
            address = "db1.internal:27017"

            [options]
            pool_size = 3
            pool_timeout = 0.1
            tcp_nodelay = false
            replica_set = "rs0"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.address, "db1.internal:27017");
        assert_eq!(config.options.pool_size(), 3);
        assert_eq!(config.options.pool_timeout(), Duration::from_millis(100));
        assert_eq!(config.options.get("tcp_nodelay"), Some(&toml::Value::Boolean(false)));
        assert_eq!(
            config.options.get("replica_set").and_then(|v| v.as_str()),
            Some("rs0")
        );
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str(r#"address = "localhost""#).unwrap();
        assert_eq!(config.options.pool_size(), POOL_SIZE);
        assert!(config.options.extra.is_empty());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_invalid_toml_reports_config_error() {
        let result = NodeConfig::from_toml_str("address = ");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = NodeConfig::new("10.0.0.5:27018");
        config.options = NodeOptions::new().with_pool_size(8);
        config.logging.verbose = true;

        config.to_file(file.path()).unwrap();
        let loaded = NodeConfig::from_file(file.path()).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.logging.effective_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
