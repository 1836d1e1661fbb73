//! Configuration module for Relaymux
//!
//! One TOML file can configure any of the three roles. Each role reads its
//! own section; `[transport]` is shared.

mod agent;
mod relay;
mod transport;

pub use agent::{ClientAgentConfig, ServerAgentConfig, SocksConfig};
pub use relay::RelayConfig;
pub use transport::{TcpConfig, TransportConfig};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Relay configuration
    #[serde(default)]
    pub relay: Option<RelayConfig>,

    /// Endpoint-server agent configuration
    #[serde(default)]
    pub server: Option<ServerAgentConfig>,

    /// Endpoint-client agent configuration
    #[serde(default)]
    pub client: Option<ClientAgentConfig>,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_empty_config() {
        let config = parse_config("").unwrap();
        assert!(config.relay.is_none());
        assert!(config.server.is_none());
        assert!(config.client.is_none());
        assert_eq!(config.transport.idle_timeout, 60);
    }

    #[test]
    fn test_parse_relay_config() {
        let config_str = r#"
[relay]
listen_addr = "0.0.0.0:4433"
proxy_token = "secret"
max_reverse_clients = 64
"#;

        let config = parse_config(config_str).unwrap();
        let relay = config.relay.unwrap();
        assert_eq!(relay.listen_addr, "0.0.0.0:4433");
        assert_eq!(relay.proxy_token.as_deref(), Some("secret"));
        assert_eq!(relay.max_reverse_clients, 64);
        assert_eq!(relay.keepalive_interval, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[server]
relay_addr = "relay.example.com:443"
device_id = "dev1"
reconnect_delay = 5

[client]
relay_addr = "relay.example.com:443"
device_id = "dev1"
local_port = 9000
target_port = 22

[client.socks]
port = 1080
proxy_token = "secret"
auth_required = true
username = "user"
password = "pass"

[transport]
idle_timeout = 30
max_concurrent_streams = 256

[transport.tcp]
nodelay = true
keepalive_secs = 30
keepalive_interval = 10
"#;

        let config = parse_config(config_str).unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.device_id, "dev1");
        assert_eq!(server.reconnect_delay, 5);

        let client = config.client.unwrap();
        assert_eq!(client.local_port, 9000);
        assert_eq!(client.target_port, 22);
        let socks = client.socks.unwrap();
        assert_eq!(socks.port, 1080);
        assert!(socks.auth_required);
        assert_eq!(socks.username, Some("user".to_string()));

        assert_eq!(config.transport.idle_timeout, 30);
        assert_eq!(config.transport.max_concurrent_streams, 256);
        assert_eq!(config.transport.tcp.keepalive_secs, 30);
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(parse_config("[relay]\nkeepalive_interval = \"soon\"").is_err());
        assert!(parse_config("[server]\ndevice_id = \"dev1\"").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\nlisten_addr = \"127.0.0.1:0\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.relay.unwrap().listen_addr, "127.0.0.1:0");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/relaymux.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
