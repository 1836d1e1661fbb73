//! Endpoint-client agent
//!
//! Listens on loopback and forwards every accepted TCP connection as a
//! link stream on a registered session. Plain connections go to the
//! endpoint server named by the device id; connections on the SOCKS5
//! port go to whatever destination the SOCKS5 request names, dialed by
//! the relay.

use super::slot::SessionSlot;
use super::socks::{self, SocksCommand, SocksRequest};
use crate::config::{ClientAgentConfig, SocksConfig, TransportConfig};
use crate::error::Socks5ReplyCode;
use crate::helper::{bridge, duration_from_secs, BridgeStats};
use crate::protocol::{write_message, LinkHeader, Registration};
use crate::session::run_keepalive;
use crate::transport::{AddrMaybeCached, Dialer, SocketOpts};
use anyhow::{Context, Result};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Shared {
    dialer: Dialer,
    relay_addr: AddrMaybeCached,
    socket_opts: SocketOpts,
    reverse: SessionSlot,
    proxy: Option<(SessionSlot, SocksConfig)>,
}

impl Shared {
    fn slots(&self) -> impl Iterator<Item = &SessionSlot> {
        std::iter::once(&self.reverse).chain(self.proxy.as_ref().map(|(slot, _)| slot))
    }
}

/// Endpoint-client agent with its listeners bound
pub struct ClientAgent {
    config: ClientAgentConfig,
    shared: Arc<Shared>,
    listener: TcpListener,
    socks_listener: Option<TcpListener>,
}

async fn bind_loopback(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

impl ClientAgent {
    /// Validate the configuration and bind the local listeners
    ///
    /// Failing to bind either listener is fatal. No session is registered
    /// until the first connection arrives.
    pub async fn bind(config: ClientAgentConfig, transport: &TransportConfig) -> Result<Self> {
        config.validate()?;
        transport.validate()?;

        let listener = bind_loopback(config.local_port).await?;
        info!(
            "Forwarding {} to {}:{}",
            listener.local_addr()?,
            config.device_id,
            config.target_port
        );

        let (socks_listener, proxy) = match &config.socks {
            Some(socks) => {
                let socks_listener = bind_loopback(socks.port).await?;
                info!("SOCKS5 front-end listening on {}", socks_listener.local_addr()?);
                let slot = SessionSlot::new(Registration::proxy(&socks.proxy_token));
                (Some(socks_listener), Some((slot, socks.clone())))
            }
            None => (None, None),
        };

        let shared = Shared {
            dialer: Dialer::new(transport),
            relay_addr: AddrMaybeCached::new(&config.relay_addr),
            socket_opts: SocketOpts::from_tcp_config(&transport.tcp),
            reverse: SessionSlot::new(Registration::reverse_client(
                &config.device_id,
                config.target_port,
            )),
            proxy,
        };

        Ok(ClientAgent {
            config,
            shared: Arc::new(shared),
            listener,
            socks_listener,
        })
    }

    /// Address of the forwarding listener
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the SOCKS5 listener, when enabled
    pub fn socks_addr(&self) -> Option<SocketAddr> {
        self.socks_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Accept connections until shutdown
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        let interval = duration_from_secs(self.config.keepalive_interval);
        let keepalive = {
            let shared = self.shared.clone();
            tokio::spawn(run_keepalive(interval, move || {
                shared.slots().filter_map(|slot| slot.peer()).collect()
            }))
        };

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((tcp, from)) => {
                        debug!("Accepted connection from {}", from);
                        let shared = self.shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = forward_reverse(&shared, tcp).await {
                                warn!("Forwarding from {} failed: {:#}", from, e);
                            }
                        });
                    }
                    Err(e) => accept_failed(e).await,
                },
                accepted = accept_optional(self.socks_listener.as_ref()) => match accepted {
                    Ok((tcp, from)) => {
                        debug!("Accepted SOCKS5 connection from {}", from);
                        let shared = self.shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_socks(&shared, tcp).await {
                                warn!("SOCKS5 connection from {} failed: {:#}", from, e);
                            }
                        });
                    }
                    Err(e) => accept_failed(e).await,
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping endpoint client");
                    break;
                }
            }
        }

        keepalive.abort();
        for slot in self.shared.slots() {
            slot.close("agent shutting down");
        }
        Ok(())
    }
}

async fn accept_optional(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn accept_failed(e: io::Error) {
    warn!("Failed to accept connection: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Forward a plain connection to the endpoint server
///
/// The link stream carries no header; the relay already knows the port
/// from the registration. It becomes visible to the relay once the first
/// bytes from the local connection are written to it.
async fn forward_reverse(shared: &Shared, tcp: TcpStream) -> Result<BridgeStats> {
    shared.socket_opts.hint(&tcp);

    let peer = shared
        .reverse
        .get_or_connect(&shared.dialer, &shared.relay_addr)
        .await?;
    let (send, recv) = peer
        .session()
        .open_bi()
        .await
        .context("Failed to open link stream")?;

    let stats = bridge(tcp.into_split(), (recv, send)).await;
    debug!(peer = peer.label(), ?stats, "Link stream closed");
    Ok(stats)
}

async fn serve_socks(shared: &Shared, mut tcp: TcpStream) -> Result<()> {
    let Some((slot, config)) = shared.proxy.as_ref() else {
        return Ok(());
    };
    shared.socket_opts.hint(&tcp);

    let SocksRequest { command, target } = socks::handshake(&mut tcp, config).await?;
    info!("SOCKS5 {} request to {}", command, target);

    if command != SocksCommand::Connect {
        warn!("SOCKS5 {} is not supported", command);
        socks::refuse(&mut tcp, Socks5ReplyCode::CommandNotSupported).await?;
        return Ok(());
    }

    let link = async {
        let peer = slot
            .get_or_connect(&shared.dialer, &shared.relay_addr)
            .await?;
        let (mut send, recv) = peer
            .session()
            .open_bi()
            .await
            .context("Failed to open proxy link stream")?;
        write_message(&mut send, &LinkHeader::remote(target.host(), target.port())).await?;
        Ok::<_, anyhow::Error>((send, recv))
    };

    let (send, recv) = match link.await {
        Ok(stream) => stream,
        Err(e) => {
            socks::refuse(&mut tcp, Socks5ReplyCode::GeneralFailure).await?;
            return Err(e);
        }
    };

    socks::accept(&mut tcp).await?;
    let stats = bridge(tcp.into_split(), (recv, send)).await;
    debug!(target = %target, ?stats, "Proxy link closed");
    Ok(())
}
