//! Protocol type definitions
//!
//! Every message is a small JSON object sent with the framing in
//! [`super::codec`]. Field names are part of the wire format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a party declares when it registers a session with the relay
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Endpoint server: the device exposing a local TCP service
    #[serde(rename = "es")]
    Server,
    /// Endpoint client: reaches a registered endpoint server by device id
    #[serde(rename = "ec")]
    ReverseClient,
    /// Proxy client: asks the relay to dial arbitrary destinations
    #[serde(rename = "px")]
    Proxy,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "es",
            Role::ReverseClient => "ec",
            Role::Proxy => "px",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First message on the first stream of every session
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Declared role
    pub role: Role,
    /// Device identifier for `es`/`ec`, proxy token for `px`
    pub duid: String,
    /// Target port on the endpoint server, required for `ec`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Registration {
    /// Registration of an endpoint server under `device_id`
    pub fn server(device_id: impl Into<String>) -> Self {
        Self {
            role: Role::Server,
            duid: device_id.into(),
            port: None,
        }
    }

    /// Registration of an endpoint client targeting `port` on `device_id`
    pub fn reverse_client(device_id: impl Into<String>, port: u16) -> Self {
        Self {
            role: Role::ReverseClient,
            duid: device_id.into(),
            port: Some(port),
        }
    }

    /// Registration of a proxy client presenting `token`
    pub fn proxy(token: impl Into<String>) -> Self {
        Self {
            role: Role::Proxy,
            duid: token.into(),
            port: None,
        }
    }
}

/// First message on a link stream, naming the destination to dial
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkHeader {
    /// Destination port
    pub port: u16,
    /// Destination host; absent means the receiver's loopback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl LinkHeader {
    /// Header for a port on the receiving endpoint server itself
    pub fn local(port: u16) -> Self {
        Self { port, host: None }
    }

    /// Header for an arbitrary destination
    pub fn remote(host: impl Into<String>, port: u16) -> Self {
        Self {
            port,
            host: Some(host.into()),
        }
    }
}

/// Messages exchanged on a command stream after registration
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum ControlCommand {
    /// Liveness probe
    Ping,
    /// Answer to a probe
    Pong,
}
