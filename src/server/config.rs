//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::engine::EngineConfig;

/// Shortest accepted call timeout
pub const MIN_CALL_TIMEOUT: Duration = Duration::from_millis(1);
/// Longest accepted call timeout
pub const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Idle time after which a session is expired
    pub idle_timeout: Duration,
    /// Wall-clock limit per tool call
    pub call_timeout: Duration,
    /// Time a cancelled handler gets before it is aborted
    pub cancel_grace: Duration,
    /// How often idle sessions are swept
    pub sweep_interval: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Enable request tracing
    pub logging: bool,
    /// CORS enabled
    pub cors_enabled: bool,
    /// Reject POSTs without `Authorization: Bearer`
    pub require_bearer: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            idle_timeout: Duration::from_secs(300),
            call_timeout: crate::engine::DEFAULT_CALL_TIMEOUT,
            cancel_grace: crate::engine::DEFAULT_CANCEL_GRACE,
            sweep_interval: Duration::from_secs(5),
            max_body_size: 4 * 1024 * 1024, // 4MB
            logging: true,
            cors_enabled: true,
            require_bearer: false,
        }
    }
}

impl ServerConfig {
    /// Create with custom port (localhost)
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.addr.port());
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set session idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set call timeout, clamped to 1ms..=10min
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout.clamp(MIN_CALL_TIMEOUT, MAX_CALL_TIMEOUT);
        self
    }

    /// Set cancellation grace period
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Set idle sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set max body size
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Require bearer credentials on POST
    pub fn with_require_bearer(mut self, required: bool) -> Self {
        self.require_bearer = required;
        self
    }

    /// Disable request logging
    pub fn without_logging(mut self) -> Self {
        self.logging = false;
        self
    }

    /// Disable CORS
    pub fn without_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }

    /// Timing handed to the execution engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            call_timeout: self.call_timeout,
            cancel_grace: self.cancel_grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8080);
        assert!(config.addr.ip().is_unspecified());
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert!(!config.require_bearer);
    }

    #[test]
    fn test_call_timeout_clamped() {
        let config = ServerConfig::default().with_call_timeout(Duration::ZERO);
        assert_eq!(config.call_timeout, MIN_CALL_TIMEOUT);

        let config = ServerConfig::default().with_call_timeout(Duration::from_secs(3600));
        assert_eq!(config.call_timeout, MAX_CALL_TIMEOUT);
    }

    #[test]
    fn test_port_and_bind() {
        let config = ServerConfig::default().with_port(9000);
        assert_eq!(config.addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.bind_all().addr.to_string(), "0.0.0.0:9000");
    }
}
