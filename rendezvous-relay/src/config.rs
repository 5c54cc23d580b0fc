//! Configuration loading for rendezvous-relay.
//!
//! Configuration is loaded from an optional TOML file (default: `relay.toml`).
//! Every section and field has a default, so an empty or missing file yields
//! a working relay on port 8080. The `PORT` environment variable overrides
//! `server.port`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the listen port.
pub const PORT_ENV: &str = "PORT";

/// Root configuration for rendezvous-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerConfig,
    /// Rate limiting and frame size configuration.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Maintenance task configuration.
    pub maintenance: MaintenanceConfig,
    /// Relay event channel configuration.
    pub events: EventsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default: 0.0.0.0).
    pub host: String,
    /// Port to bind (default: 8080, 0 picks a free port).
    pub port: u16,
}

/// Rate limiting and frame size configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum Join/Leave messages per peer per minute (default: 600).
    pub messages_per_minute: u32,
    /// Maximum new connections per second across all clients (default: 1000).
    pub connections_per_second: u32,
    /// Largest accepted registration frame in bytes (default: 64KB).
    /// Direct connections are not limited.
    pub max_message_size: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    pub metrics_enabled: bool,
}

/// Maintenance task configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Maintenance interval in seconds (default: 60).
    pub interval_secs: u64,
    /// Enable maintenance task (default: true).
    pub enabled: bool,
}

/// Relay event channel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before it starts lagging (default: 1024).
    pub capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: 600,
            connections_per_second: 1000,
            max_message_size: 64 * 1024, // 64KB
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            enabled: true,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl ServerConfig {
    /// The `host:port` string to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load configuration for the relay binary.
    ///
    /// Reads `path` if it exists (defaults otherwise), then applies the
    /// `PORT` environment override and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::info!("No config file at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_port_override(std::env::var(PORT_ENV).ok().as_deref())?;
        config.validate()?;
        Ok(config)
    }

    /// Override `server.port` from the value of the `PORT` variable.
    pub fn apply_port_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        if let Some(raw) = value {
            let port = raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort {
                    value: raw.to_string(),
                })?;
            self.server.port = port;
        }
        Ok(())
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.messages_per_minute == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.messages_per_minute",
                reason: "must be > 0",
            });
        }
        if self.limits.connections_per_second == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.connections_per_second",
                reason: "must be > 0",
            });
        }
        if self.limits.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_message_size",
                reason: "must be > 0",
            });
        }
        if self.maintenance.enabled && self.maintenance.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "maintenance.interval_secs",
                reason: "must be > 0 when maintenance is enabled",
            });
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "events.capacity",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// `PORT` is not a valid port number.
    #[error("invalid PORT value: {value:?}")]
    InvalidPort {
        /// The raw environment value.
        value: String,
    },
    /// A field holds a value the relay cannot run with.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[limits]
messages_per_minute = 30

[http]
metrics_enabled = false

[maintenance]
interval_secs = 5
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.limits.messages_per_minute, 30);
        assert_eq!(config.limits.connections_per_second, 1000);
        assert!(!config.http.metrics_enabled);
        assert_eq!(config.maintenance.interval_secs, 5);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.events.capacity, 1024);
    }

    #[test]
    fn port_override_replaces_port() {
        let mut config = Config::default();
        config.apply_port_override(Some("3000")).unwrap();
        assert_eq!(config.server.port, 3000);

        config.apply_port_override(None).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn invalid_port_override_rejected() {
        let mut config = Config::default();
        let err = config.apply_port_override(Some("eighty")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { .. }));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn zero_limits_rejected() {
        let mut config = Config::default();
        config.limits.messages_per_minute = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "limits.messages_per_minute",
                ..
            })
        ));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 4242").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 4242);
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
