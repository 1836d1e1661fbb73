//! Endpoint agent configuration types
//!
//! `[server]` configures the endpoint-server agent that exposes a local
//! service; `[client]` configures the endpoint-client agent and its
//! optional SOCKS5 front-end.

use crate::error::RelayError;
use crate::helper::{DEFAULT_AGENT_KEEPALIVE_SECS, DEFAULT_RECONNECT_DELAY_SECS};
use serde::{Deserialize, Serialize};

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_keepalive_interval() -> u64 {
    DEFAULT_AGENT_KEEPALIVE_SECS
}

fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY_SECS
}

fn default_local_port() -> u16 {
    8009
}

fn default_target_port() -> u16 {
    3389
}

fn validate_common(
    section: &str,
    relay_addr: &str,
    device_id: &str,
    keepalive: u64,
) -> Result<(), RelayError> {
    if relay_addr.is_empty() {
        return Err(RelayError::Config(format!("{}.relay_addr is empty", section)));
    }
    if device_id.is_empty() {
        return Err(RelayError::Config(format!("{}.device_id is empty", section)));
    }
    if keepalive == 0 {
        return Err(RelayError::Config(format!(
            "{}.keepalive_interval must be greater than zero",
            section
        )));
    }
    Ok(())
}

/// Endpoint-server agent configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerAgentConfig {
    /// Relay address (e.g., "relay.example.com:443")
    pub relay_addr: String,

    /// Device identifier this agent registers under
    pub device_id: String,

    /// Host link streams are dialed on
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Seconds between keepalive rounds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// Seconds to wait after a failed registration
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
}

impl ServerAgentConfig {
    /// Create a configuration with defaults for everything but the addresses
    pub fn new(relay_addr: impl Into<String>, device_id: impl Into<String>) -> Self {
        ServerAgentConfig {
            relay_addr: relay_addr.into(),
            device_id: device_id.into(),
            local_host: default_local_host(),
            keepalive_interval: default_keepalive_interval(),
            reconnect_delay: default_reconnect_delay(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        validate_common("server", &self.relay_addr, &self.device_id, self.keepalive_interval)?;
        if self.local_host.is_empty() {
            return Err(RelayError::Config("server.local_host is empty".to_string()));
        }
        if self.reconnect_delay == 0 {
            return Err(RelayError::Config(
                "server.reconnect_delay must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Endpoint-client agent configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientAgentConfig {
    /// Relay address (e.g., "relay.example.com:443")
    pub relay_addr: String,

    /// Device identifier of the endpoint server to reach
    pub device_id: String,

    /// Local port accepting TCP connections, bound on 127.0.0.1
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    /// Port dialed on the endpoint server's side
    #[serde(default = "default_target_port")]
    pub target_port: u16,

    /// Seconds between keepalive rounds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// SOCKS5 front-end, disabled when absent
    #[serde(default)]
    pub socks: Option<SocksConfig>,
}

impl ClientAgentConfig {
    /// Create a configuration with defaults for everything but the addresses
    pub fn new(relay_addr: impl Into<String>, device_id: impl Into<String>) -> Self {
        ClientAgentConfig {
            relay_addr: relay_addr.into(),
            device_id: device_id.into(),
            local_port: default_local_port(),
            target_port: default_target_port(),
            keepalive_interval: default_keepalive_interval(),
            socks: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        validate_common("client", &self.relay_addr, &self.device_id, self.keepalive_interval)?;
        if let Some(socks) = &self.socks {
            socks.validate()?;
        }
        Ok(())
    }
}

/// SOCKS5 front-end configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocksConfig {
    /// Local port the SOCKS5 server binds on 127.0.0.1
    pub port: u16,

    /// Token presented to the relay for the proxy session
    pub proxy_token: String,

    /// Enable/disable authentication
    #[serde(default)]
    pub auth_required: bool,

    /// Username for SOCKS5 auth
    #[serde(default)]
    pub username: Option<String>,

    /// Password for SOCKS5 auth
    #[serde(default)]
    pub password: Option<String>,
}

impl SocksConfig {
    /// Create an unauthenticated front-end configuration
    pub fn new(port: u16, proxy_token: impl Into<String>) -> Self {
        SocksConfig {
            port,
            proxy_token: proxy_token.into(),
            auth_required: false,
            username: None,
            password: None,
        }
    }

    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.proxy_token.is_empty() {
            return Err(RelayError::Config("client.socks.proxy_token is empty".to_string()));
        }
        if self.auth_required && !self.has_credentials() {
            return Err(RelayError::Config(
                "Authentication required but no credentials configured".to_string(),
            ));
        }
        Ok(())
    }
}
