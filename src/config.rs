//! Configuration management

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// UDP ingestion configuration
    pub network: NetworkConfig,

    /// HTTP/WebSocket configuration
    pub ui: UiConfig,

    /// Fan-out configuration
    pub relay: RelayConfig,
}

/// UDP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local bind address
    pub bind_address: String,

    /// UDP port the log stream arrives on
    pub udp_port: u16,

    /// Socket receive buffer size
    pub recv_buffer_size: usize,

    /// Enable SO_REUSEADDR
    pub reuse_addr: bool,

    /// Largest datagram kept; longer ones are truncated
    pub max_datagram_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            udp_port: DEFAULT_UDP_PORT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            reuse_addr: true,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        parse_addr(&self.bind_address, self.udp_port)
    }
}

/// Web server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Bind address for the web server, also the host the page connects back to
    pub bind_address: String,

    /// HTTP server port
    pub http_port: u16,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            enable_cors: true,
        }
    }
}

impl UiConfig {
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        parse_addr(&self.bind_address, self.http_port)
    }
}

/// Per-consumer buffering and reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of each consumer's outbound queue
    pub queue_capacity: usize,

    /// Seconds between statistics log lines (0 disables)
    pub stats_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl RelayConfig {
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

fn parse_addr(host: &str, port: u16) -> crate::Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            crate::Error::Config(format!("invalid address {}:{}: {}", host, port, e))
        })
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "udp-log-viewer", "udp-log-viewer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.relay.queue_capacity == 0 {
            return Err(crate::Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.network.max_datagram_size == 0 || self.network.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(crate::Error::Config(format!(
                "max_datagram_size must be between 1 and {}",
                MAX_UDP_PAYLOAD
            )));
        }
        self.network.socket_addr()?;
        self.ui.socket_addr()?;
        Ok(())
    }
}
