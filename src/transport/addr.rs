//! Address handling with DNS caching
//!
//! Agents dial the relay repeatedly over their lifetime; the first
//! successful resolution is remembered until a dial fails.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Address that may have a cached resolved address
#[derive(Debug, Clone)]
pub struct AddrMaybeCached {
    /// The original address string
    addr: String,
    /// Cached resolved address
    cached: Arc<RwLock<Option<SocketAddr>>>,
}

impl AddrMaybeCached {
    /// Create a new address without cached resolution
    pub fn new(addr: &str) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Get the original address string
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the cached address if available
    pub async fn get_cached(&self) -> Option<SocketAddr> {
        *self.cached.read().await
    }

    /// Forget the cached address so the next dial resolves again
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }

    /// Resolve the address, using cache if available
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Some(cached) = self.get_cached().await {
            return Ok(cached);
        }

        let resolved = self.resolve_fresh().await?;
        *self.cached.write().await = Some(resolved);
        Ok(resolved)
    }

    /// Resolve the address without using cache
    pub async fn resolve_fresh(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host(&self.addr)
            .await
            .with_context(|| format!("Failed to resolve address: {}", self.addr))?
            .next()
            .with_context(|| format!("No addresses found for: {}", self.addr))
    }
}

impl From<SocketAddr> for AddrMaybeCached {
    fn from(addr: SocketAddr) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(Some(addr))),
        }
    }
}

impl From<&str> for AddrMaybeCached {
    fn from(addr: &str) -> Self {
        AddrMaybeCached::new(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_addr_maybe_cached_new() {
        let addr = AddrMaybeCached::new("relay.example.com:443");
        assert_eq!(addr.addr(), "relay.example.com:443");
        assert!(addr.get_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_caches_and_clears() {
        let addr = AddrMaybeCached::new("127.0.0.1:443");
        let resolved = addr.resolve().await.unwrap();

        assert_eq!(resolved.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(resolved.port(), 443);
        assert_eq!(addr.get_cached().await, Some(resolved));

        addr.clear_cache().await;
        assert!(addr.get_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_from_socket_addr_uses_cache() {
        let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 443);
        let addr: AddrMaybeCached = socket_addr.into();

        assert_eq!(addr.addr(), "10.0.0.1:443");
        assert_eq!(addr.resolve().await.unwrap(), socket_addr);
    }

    #[tokio::test]
    async fn test_resolve_invalid() {
        let addr = AddrMaybeCached::new("not an address");
        assert!(addr.resolve().await.is_err());
    }
}
