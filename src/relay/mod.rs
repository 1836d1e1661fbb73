//! Relay
//!
//! The rendezvous process. It accepts QUIC sessions from endpoint agents,
//! keeps them in three directories and bridges link streams between
//! reverse clients and endpoint servers. Proxy link streams are dialed by
//! the relay itself.

mod dispatcher;
mod egress;
mod pairing;

pub use dispatcher::{handle_session, OUT_OF_SCOPE};
pub use egress::{is_local, resolve_destination, serve_proxy_stream, DestinationPolicy};
pub use pairing::pair_with_server;

use crate::config::{RelayConfig, TransportConfig};
use crate::directory::Directory;
use crate::helper::duration_from_secs;
use crate::session::{run_keepalive, EndpointPeer};
use crate::transport::{server_endpoint, SocketOpts};
use anyhow::{Context, Result};
use quinn::{Endpoint, VarInt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Shared state of a running relay
pub struct RelayState {
    /// Endpoint servers by device id
    pub servers: Directory<String, EndpointPeer>,
    /// Reverse clients by registration index
    pub reverse_clients: Directory<u64, EndpointPeer>,
    /// Proxy clients by token
    pub proxies: Directory<String, EndpointPeer>,
    config: RelayConfig,
    socket_opts: SocketOpts,
    next_reverse_index: AtomicU64,
}

impl RelayState {
    /// Create empty state for `config`
    pub fn new(config: RelayConfig, socket_opts: SocketOpts) -> Self {
        RelayState {
            servers: Directory::new("servers"),
            reverse_clients: Directory::new("reverse-clients"),
            proxies: Directory::new("proxies"),
            config,
            socket_opts,
            next_reverse_index: AtomicU64::new(0),
        }
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Allocate the next reverse client index; indices are never reused
    pub fn next_reverse_index(&self) -> u64 {
        self.next_reverse_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Every live handle across all directories
    pub fn all_peers(&self) -> Vec<Arc<EndpointPeer>> {
        let mut peers = self.servers.handles();
        peers.extend(self.proxies.handles());
        peers.extend(self.reverse_clients.handles());
        peers
    }
}

/// A bound relay, ready to run
pub struct Relay {
    endpoint: Endpoint,
    state: Arc<RelayState>,
}

impl Relay {
    /// Bind the QUIC endpoint; failure here is fatal
    pub async fn bind(config: RelayConfig, transport: &TransportConfig) -> Result<Self> {
        config.validate()?;
        transport.validate()?;

        let listen: SocketAddr = tokio::net::lookup_host(&config.listen_addr)
            .await
            .with_context(|| format!("Failed to resolve listen address {}", config.listen_addr))?
            .next()
            .with_context(|| format!("No addresses found for {}", config.listen_addr))?;

        let endpoint = server_endpoint(listen, transport)?;
        let socket_opts = SocketOpts::from_tcp_config(&transport.tcp);
        info!("Relay listening on {}", endpoint.local_addr()?);

        Ok(Relay {
            endpoint,
            state: Arc::new(RelayState::new(config, socket_opts)),
        })
    }

    /// Address the endpoint is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Shared state, for inspection
    pub fn state(&self) -> Arc<RelayState> {
        self.state.clone()
    }

    /// Accept sessions until shutdown
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let interval = duration_from_secs(self.state.config.keepalive_interval);
        let keepalive = {
            let state = self.state.clone();
            tokio::spawn(run_keepalive(interval, move || state.all_peers()))
        };

        loop {
            tokio::select! {
                incoming = self.endpoint.accept() => {
                    let Some(connecting) = incoming else {
                        warn!("QUIC endpoint closed");
                        break;
                    };

                    let state = self.state.clone();
                    tokio::spawn(async move {
                        match connecting.await {
                            Ok(conn) => handle_session(state, conn).await,
                            Err(e) => debug!("Handshake failed: {}", e),
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping relay");
                    break;
                }
            }
        }

        keepalive.abort();
        self.endpoint.close(VarInt::from_u32(0), b"relay shutting down");
        info!("Relay stopped");
        Ok(())
    }
}
