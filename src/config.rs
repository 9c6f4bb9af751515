//! WolfGate Configuration
//!
//! This module provides configuration structures for the WolfGate
//! provisioning service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main WolfGate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WolfGateConfig {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Client registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path of the gateway's WireGuard config file
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Gateway address in CIDR notation (e.g. "10.8.0.1/24")
    #[serde(default = "default_address")]
    pub address: String,

    /// UDP listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Public endpoint handed to clients (host:port)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Ranges clients route through the tunnel
    #[serde(default = "default_client_allowed_ips")]
    pub client_allowed_ips: String,
}

/// Client registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/wireguard/wg0.conf")
}

fn default_address() -> String {
    "10.8.0.1/24".to_string()
}

fn default_listen_port() -> u16 {
    51820
}

fn default_endpoint() -> String {
    "vpn.example.com:51820".to_string()
}

fn default_client_allowed_ips() -> String {
    "0.0.0.0/0".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/wolfgate/users.db")
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            address: default_address(),
            listen_port: default_listen_port(),
            endpoint: default_endpoint(),
            client_allowed_ips: default_client_allowed_ips(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfGateConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfGateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway.address.parse::<ipnetwork::IpNetwork>().is_err() {
            return Err(crate::Error::Config(format!(
                "gateway.address {:?} is not a CIDR address",
                self.gateway.address
            )));
        }

        if self.gateway.listen_port == 0 {
            return Err(crate::Error::Config("gateway.listen_port cannot be 0".into()));
        }

        if self.gateway.endpoint.is_empty() {
            return Err(crate::Error::Config("gateway.endpoint cannot be empty".into()));
        }

        if self.gateway.config_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("gateway.config_path cannot be empty".into()));
        }

        if self.registry.db_path.as_os_str().is_empty() {
            return Err(crate::Error::Config("registry.db_path cannot be empty".into()));
        }

        if self.api.enabled && self.api.bind_address.is_empty() {
            return Err(crate::Error::Config("api.bind_address cannot be empty".into()));
        }

        Ok(())
    }
}
