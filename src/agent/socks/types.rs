//! SOCKS5 request types

use super::consts::*;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT
    Connect,
    /// TCP BIND, always refused
    Bind,
    /// UDP ASSOCIATE, always refused
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Destination named in a SOCKS5 request
///
/// Domain names are kept unresolved; the relay resolves them when it dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Host part as sent in a link header
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    /// Port number
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl From<(IpAddr, u16)> for TargetAddr {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        TargetAddr::Ip(SocketAddr::new(ip, port))
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// A parsed SOCKS5 request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksRequest {
    /// Requested command
    pub command: SocksCommand,
    /// Requested destination
    pub target: TargetAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_command_from_byte() {
        assert_eq!(SocksCommand::from_byte(1), Some(SocksCommand::Connect));
        assert_eq!(SocksCommand::from_byte(2), Some(SocksCommand::Bind));
        assert_eq!(SocksCommand::from_byte(3), Some(SocksCommand::UdpAssociate));
        assert_eq!(SocksCommand::from_byte(4), None);
    }

    #[test]
    fn test_target_host_and_port() {
        let ip: TargetAddr = "10.0.0.1:8080".parse::<SocketAddr>().map(TargetAddr::Ip).unwrap();
        assert_eq!(ip.host(), "10.0.0.1");
        assert_eq!(ip.port(), 8080);

        let v6 = TargetAddr::from((IpAddr::V6(Ipv6Addr::LOCALHOST), 443));
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:443");

        let domain = TargetAddr::Domain("example.com".to_string(), 80);
        assert_eq!(domain.host(), "example.com");
        assert_eq!(domain.to_string(), "example.com:80");
    }
}
