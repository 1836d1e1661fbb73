//! Proxy egress
//!
//! Link streams from proxy clients name an arbitrary destination. The relay
//! dials it over TCP and bridges the stream with the connection.

use crate::error::RelayError;
use crate::helper::{bridge, BridgeStats};
use crate::protocol::{read_json, LinkHeader};
use crate::transport::{SocketOpts, DEFAULT_CONNECT_TIMEOUT};
use anyhow::{anyhow, Context, Result};
use quinn::{RecvStream, SendStream};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Where proxy clients may connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationPolicy {
    /// Allow loopback, unspecified and link-local destinations
    pub allow_local: bool,
}

impl DestinationPolicy {
    /// Whether `addr` may be dialed
    pub fn permits(&self, addr: &IpAddr) -> bool {
        self.allow_local || !is_local(addr)
    }
}

fn is_local_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_unspecified() || ip.is_link_local()
}

fn is_local_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_local_v4(&mapped);
    }
    // fe80::/10
    ip.is_loopback() || ip.is_unspecified() || (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Loopback, unspecified or link-local, including IPv4-mapped forms
pub fn is_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => is_local_v4(ip),
        IpAddr::V6(ip) => is_local_v6(ip),
    }
}

/// Resolve `host:port` and keep only the addresses `policy` permits
pub async fn resolve_destination(
    host: &str,
    port: u16,
    policy: DestinationPolicy,
) -> Result<Vec<SocketAddr>> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .collect();

    let permitted: Vec<SocketAddr> = resolved
        .iter()
        .copied()
        .filter(|addr| policy.permits(&addr.ip()))
        .collect();

    if permitted.is_empty() {
        if resolved.is_empty() {
            return Err(anyhow!("No addresses found for {}:{}", host, port));
        }
        return Err(anyhow!("Destination {}:{} is not allowed", host, port));
    }
    Ok(permitted)
}

async fn dial_any(addrs: &[SocketAddr], opts: &SocketOpts) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                opts.hint(&stream);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                last_err = Some(anyhow!(e).context(format!("Failed to connect to {}", addr)));
            }
            Err(_) => last_err = Some(anyhow!("Connection timeout to {}", addr)),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("No destination addresses")))
}

/// Serve one proxy link stream: read its header, dial the destination, bridge
pub async fn serve_proxy_stream(
    stream: (SendStream, RecvStream),
    policy: DestinationPolicy,
    opts: &SocketOpts,
) -> Result<BridgeStats> {
    let (send, mut recv) = stream;

    let header: LinkHeader = read_json(&mut recv)
        .await
        .context("Failed to read link header")?;
    let host = header
        .host
        .ok_or_else(|| RelayError::Protocol("proxy link header without host".to_string()))?;

    info!(host = %host, port = header.port, "Proxy link requested");
    let addrs = match resolve_destination(&host, header.port, policy).await {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!(host = %host, port = header.port, "Refusing proxy link: {:#}", e);
            return Err(e);
        }
    };

    let conn = dial_any(&addrs, opts).await?;
    let stats = bridge((recv, send), conn.into_split()).await;
    debug!(host = %host, port = header.port, ?stats, "Proxy link closed");
    Ok(stats)
}
