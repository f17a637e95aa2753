//! Configuration management.
//!
//! Supports configuration from, in increasing precedence:
//! - built-in defaults
//! - a TOML config file
//! - environment variables
//! - CLI arguments (applied by the binary)

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{McpError, Result};
use crate::server::ServerConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server and session settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            McpError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| McpError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/analytics-mcp/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("analytics-mcp").join("config.toml"))
    }

    /// Load defaults, then the config file, then the process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "Loading config file");
                    Self::from_file(path)?
                },
                None => Self::default(),
            },
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Unparsable values are an error rather than silently ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env(&lookup, "PORT")? {
            self.server.port = port;
        }
        if let Some(ms) = parse_env(&lookup, "MCP_IDLE_TIMEOUT_MS")? {
            self.server.idle_timeout_ms = ms;
        }
        if let Some(ms) = parse_env(&lookup, "MCP_CALL_TIMEOUT_MS")? {
            self.server.call_timeout_ms = ms;
        }
        if let Some(ms) = parse_env(&lookup, "MCP_CANCEL_GRACE_MS")? {
            self.server.cancel_grace_ms = ms;
        }
        if let Some(required) = parse_env(&lookup, "MCP_REQUIRE_BEARER")? {
            self.server.require_bearer = required;
        }
        if let Some(level) = lookup("MCP_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(self)
    }

    /// Validated runtime server configuration
    pub fn server_config(&self) -> Result<ServerConfig> {
        let s = &self.server;
        let mut config = ServerConfig::default()
            .with_addr(s.socket_addr()?)
            .with_idle_timeout(Duration::from_millis(s.idle_timeout_ms))
            .with_call_timeout(Duration::from_millis(s.call_timeout_ms))
            .with_cancel_grace(Duration::from_millis(s.cancel_grace_ms))
            .with_sweep_interval(Duration::from_millis(s.sweep_interval_ms))
            .with_max_body_size(s.max_body_size)
            .with_require_bearer(s.require_bearer);
        if !s.cors_enabled {
            config = config.without_cors();
        }
        Ok(config)
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| McpError::Config(format!("Invalid value for {key}: {raw:?}"))),
        None => Ok(None),
    }
}

/// HTTP server and session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Session idle timeout in milliseconds
    pub idle_timeout_ms: u64,

    /// Tool call timeout in milliseconds (clamped to 1ms..=10min)
    pub call_timeout_ms: u64,

    /// Grace period after cancellation in milliseconds
    pub cancel_grace_ms: u64,

    /// Idle sweep interval in milliseconds
    pub sweep_interval_ms: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Send permissive CORS headers
    pub cors_enabled: bool,

    /// Reject requests without bearer credentials
    pub require_bearer: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            idle_timeout_ms: 300_000,
            call_timeout_ms: 30_000,
            cancel_grace_ms: 2_000,
            sweep_interval_ms: 5_000,
            max_body_size: 4 * 1024 * 1024, // 4 MB
            cors_enabled: true,
            require_bearer: false,
        }
    }
}

impl ServerSettings {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                McpError::Config(format!("Invalid listen address {}: {e}", self.listen_addr()))
            })?
            .next()
            .ok_or_else(|| McpError::Config(format!("No address for {}", self.listen_addr())))
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` wins when set)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.logging.level, "info");
        assert!(!config.server.require_bearer);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9090
            call_timeout_ms = 5000

            [logging]
            json = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.call_timeout_ms, 5000);
        // Unset keys keep their defaults
        assert_eq!(config.server.idle_timeout_ms, 300_000);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7001").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 7001);

        assert!(Config::from_file("/nonexistent/analytics-mcp.toml").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let config = Config::default()
            .with_env(env(&[
                ("HOST", "127.0.0.1"),
                ("PORT", "9191"),
                ("MCP_CALL_TIMEOUT_MS", "250"),
                ("MCP_REQUIRE_BEARER", "true"),
                ("MCP_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.server.listen_addr(), "127.0.0.1:9191");
        assert_eq!(config.server.call_timeout_ms, 250);
        assert!(config.server.require_bearer);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_env_rejected() {
        let err = Config::default()
            .with_env(env(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, McpError::Config(msg) if msg.contains("PORT")));
    }

    #[test]
    fn test_server_config_conversion() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.call_timeout_ms = 0;
        config.server.cors_enabled = false;

        let server = config.server_config().unwrap();
        assert_eq!(server.addr.to_string(), "127.0.0.1:8080");
        assert_eq!(server.call_timeout, crate::server::MIN_CALL_TIMEOUT);
        assert!(!server.cors_enabled);
    }
}
