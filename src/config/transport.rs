//! Transport configuration types
//!
//! Settings for the QUIC sessions between agents and the relay, and the
//! socket options applied to local TCP connections.

use crate::error::RelayError;
use crate::helper::DEFAULT_IDLE_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};

/// Default idle timeout in seconds
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

/// Default cap on concurrently open bidirectional streams per session
fn default_max_concurrent_streams() -> u32 {
    1024
}

/// Main transport configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    /// Seconds of silence after which a QUIC session is dropped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Concurrent bidirectional streams a peer may open on one session
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: u32,

    /// TCP socket options for local connections
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            idle_timeout: default_idle_timeout(),
            max_concurrent_streams: default_max_concurrent_streams(),
            tcp: TcpConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.idle_timeout == 0 {
            return Err(RelayError::Config(
                "transport.idle_timeout must be greater than zero".to_string(),
            ));
        }
        // QUIC idle timeouts are carried in milliseconds as a 62-bit varint.
        if self.idle_timeout > u32::MAX as u64 / 1000 {
            return Err(RelayError::Config(format!(
                "transport.idle_timeout {} is too large",
                self.idle_timeout
            )));
        }
        if self.max_concurrent_streams == 0 {
            return Err(RelayError::Config(
                "transport.max_concurrent_streams must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_nodelay() -> bool {
    true
}

/// TCP socket configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}
