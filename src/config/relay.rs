//! Relay configuration types

use crate::error::RelayError;
use crate::helper::DEFAULT_RELAY_KEEPALIVE_SECS;
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:443".to_string()
}

fn default_keepalive_interval() -> u64 {
    DEFAULT_RELAY_KEEPALIVE_SECS
}

/// Relay configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelayConfig {
    /// UDP address the QUIC endpoint binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Token proxy clients must present; proxy sessions are refused without one
    #[serde(default)]
    pub proxy_token: Option<String>,

    /// Seconds between keepalive rounds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// Cap on concurrently registered reverse clients, 0 for no cap
    #[serde(default)]
    pub max_reverse_clients: usize,

    /// Let proxy clients reach loopback, link-local and unspecified addresses
    #[serde(default)]
    pub allow_local_destinations: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: default_listen_addr(),
            proxy_token: None,
            keepalive_interval: default_keepalive_interval(),
            max_reverse_clients: 0,
            allow_local_destinations: false,
        }
    }
}

impl RelayConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.listen_addr.is_empty() {
            return Err(RelayError::Config("relay.listen_addr is empty".to_string()));
        }
        if self.keepalive_interval == 0 {
            return Err(RelayError::Config(
                "relay.keepalive_interval must be greater than zero".to_string(),
            ));
        }
        if matches!(self.proxy_token.as_deref(), Some("")) {
            return Err(RelayError::Config("relay.proxy_token is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:443");
        assert_eq!(config.keepalive_interval, 10);
        assert_eq!(config.max_reverse_clients, 0);
        assert!(config.proxy_token.is_none());
        assert!(!config.allow_local_destinations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relay_config_validate() {
        let config = RelayConfig {
            keepalive_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            proxy_token: Some(String::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            listen_addr: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
