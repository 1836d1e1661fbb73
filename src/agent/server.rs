//! Endpoint-server agent
//!
//! Keeps exactly one registration with the relay under its device id and
//! serves every link stream the relay opens by dialing the requested port
//! locally. A failed registration is retried after a delay; a lost session
//! is re-registered straight away.

use super::slot::register;
use crate::config::{ServerAgentConfig, TransportConfig};
use crate::helper::{bridge, duration_from_secs, BridgeStats};
use crate::protocol::{read_json, LinkHeader, Registration};
use crate::session::{run_keepalive, EndpointPeer};
use crate::transport::{connect_tcp, AddrMaybeCached, Dialer, SocketOpts};
use anyhow::{Context, Result};
use quinn::{Connection, ConnectionError, RecvStream, SendStream};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Endpoint-server agent
pub struct ServerAgent {
    config: ServerAgentConfig,
    dialer: Dialer,
    relay_addr: AddrMaybeCached,
    socket_opts: SocketOpts,
    current: Mutex<Option<Arc<EndpointPeer>>>,
}

impl ServerAgent {
    /// Create an agent; nothing is dialed until [`ServerAgent::run`]
    pub fn new(config: ServerAgentConfig, transport: &TransportConfig) -> Result<Self> {
        config.validate()?;
        transport.validate()?;

        Ok(ServerAgent {
            relay_addr: AddrMaybeCached::new(&config.relay_addr),
            dialer: Dialer::new(transport),
            socket_opts: SocketOpts::from_tcp_config(&transport.tcp),
            current: Mutex::new(None),
            config,
        })
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<EndpointPeer>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The registered session, if any
    pub fn peer(&self) -> Option<Arc<EndpointPeer>> {
        self.lock_current()
            .as_ref()
            .filter(|peer| !peer.is_closed())
            .cloned()
    }

    /// Stay registered until shutdown
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let interval = duration_from_secs(self.config.keepalive_interval);

        tokio::select! {
            _ = run_keepalive(interval, || self.peer().into_iter().collect()) => {}
            _ = self.reconnect_loop() => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping endpoint server");
            }
        }

        if let Some(peer) = self.lock_current().take() {
            peer.force_close("agent shutting down");
        }
        Ok(())
    }

    async fn reconnect_loop(&self) {
        let delay = duration_from_secs(self.config.reconnect_delay);

        loop {
            match self.run_once().await {
                Ok(()) => info!(duid = %self.config.device_id, "Session lost, registering again"),
                Err(e) => {
                    warn!(
                        duid = %self.config.device_id,
                        "Registration failed: {:#}. Retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Register once and serve the session until it ends
    ///
    /// Errors mean the registration itself failed.
    async fn run_once(&self) -> Result<()> {
        info!(
            duid = %self.config.device_id,
            "Registering with relay {}",
            self.relay_addr.addr()
        );

        let registration = Registration::server(&self.config.device_id);
        let (peer, mut recv) = register(&self.dialer, &self.relay_addr, &registration)
            .await
            .context("Failed to register")?;
        *self.lock_current() = Some(peer.clone());
        info!(duid = %self.config.device_id, "Endpoint server registered");

        tokio::select! {
            err = peer.serve_commands(&mut recv) => debug!("Command stream ended: {}", err),
            err = self.accept_links(peer.session()) => debug!("Session ended: {}", err),
        }

        peer.force_close("session lost");
        self.lock_current().take();
        Ok(())
    }

    async fn accept_links(&self, conn: &Connection) -> ConnectionError {
        loop {
            let stream = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(e) => return e,
            };

            let host = self.config.local_host.clone();
            let opts = self.socket_opts.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_link(stream, &host, &opts).await {
                    warn!("Link stream failed: {:#}", e);
                }
            });
        }
    }
}

/// Serve one link stream: read its header, dial `host` on the named port, bridge
pub async fn serve_link(
    stream: (SendStream, RecvStream),
    host: &str,
    opts: &SocketOpts,
) -> Result<BridgeStats> {
    let (send, mut recv) = stream;

    let header: LinkHeader = read_json(&mut recv)
        .await
        .context("Failed to read link header")?;
    debug!(port = header.port, "Link stream requested");

    let tcp = connect_tcp(host, header.port, opts).await?;
    let stats = bridge((recv, send), tcp.into_split()).await;
    debug!(port = header.port, ?stats, "Link stream closed");
    Ok(stats)
}
