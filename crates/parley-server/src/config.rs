//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_HOST, PARLEY_PORT)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use parley_core::HubConfig;
use parley_protocol::codec::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Queue and frame limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Idle connection sweep.
    #[serde(default)]
    pub idle: IdleConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Identity used when the client supplies none.
    #[serde(default = "default_user_id")]
    pub default_user_id: String,
}

/// Limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of the hub's command queue.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Idle sweep configuration.
///
/// Clients are never pinged, so an enabled sweep drops any connection that
/// stays silent for longer than the timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Idle timeout in milliseconds. Zero disables the sweep.
    #[serde(default)]
    pub timeout_ms: u64,

    /// Sweep interval in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_command_queue_capacity() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_sweep_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            idle: IdleConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            default_user_id: default_user_id(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values that would break the server at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.limits.outbound_queue_capacity == 0 {
            bail!("limits.outbound_queue_capacity must be greater than zero");
        }
        if self.limits.command_queue_capacity == 0 {
            bail!("limits.command_queue_capacity must be greater than zero");
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be greater than zero");
        }
        if self.limits.max_message_size > MAX_FRAME_SIZE {
            bail!(
                "limits.max_message_size must not exceed {} bytes",
                MAX_FRAME_SIZE
            );
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        if self.idle.timeout_ms > 0 && self.idle.sweep_interval_ms == 0 {
            bail!("idle.sweep_interval_ms must be greater than zero when the sweep is enabled");
        }

        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_capacity: self.limits.command_queue_capacity,
            outbound_capacity: self.limits.outbound_queue_capacity,
            idle_timeout: (self.idle.timeout_ms > 0)
                .then(|| Duration::from_millis(self.idle.timeout_ms)),
            sweep_interval: Duration::from_millis(self.idle.sweep_interval_ms),
        }
    }
}
