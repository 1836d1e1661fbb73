//! Session dispatch
//!
//! Every accepted session starts with a command stream carrying a
//! registration. The declared role decides which directory the session
//! goes into and what its accepted streams are used for. Whatever happens,
//! the session is closed with `out of scope` once its serving loop ends.

use super::egress::{serve_proxy_stream, DestinationPolicy};
use super::pairing::pair_with_server;
use super::RelayState;
use crate::error::RelayError;
use crate::protocol::{read_json, Registration, Role};
use crate::session::{EndpointPeer, Peer, Session};
use anyhow::{anyhow, bail, Context, Result};
use quinn::{Connection, ConnectionError, RecvStream, SendStream};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reason sent when the relay ends a session it was serving
pub const OUT_OF_SCOPE: &str = "out of scope";

/// Serve an accepted session until it ends, then close it
pub async fn handle_session(state: Arc<RelayState>, conn: Connection) {
    let remote = conn.remote_address();
    debug!("Accepted session from {}", remote);

    if let Err(e) = dispatch(&state, &conn).await {
        warn!("Session from {} ended: {:#}", remote, e);
    }

    conn.close_with_reason(OUT_OF_SCOPE);
    debug!("Session from {} closed", remote);
}

async fn dispatch(state: &Arc<RelayState>, conn: &Connection) -> Result<()> {
    let (send, mut recv) = conn
        .accept_bi()
        .await
        .context("Failed to accept command stream")?;

    let registration: Registration = read_json(&mut recv)
        .await
        .context("Failed to read registration")?;

    info!(
        role = %registration.role,
        duid = %registration.duid,
        port = ?registration.port,
        "Registration from {}",
        conn.remote_address()
    );

    match registration.role {
        Role::Server => serve_server(state, conn, send, recv, registration.duid).await,
        Role::ReverseClient => {
            let port = registration
                .port
                .ok_or_else(|| RelayError::Protocol("reverse client without port".to_string()))?;
            serve_reverse_client(state, conn, send, recv, registration.duid, port).await
        }
        Role::Proxy => serve_proxy(state, conn, send, recv, registration.duid).await,
    }
}

async fn serve_server(
    state: &Arc<RelayState>,
    conn: &Connection,
    send: SendStream,
    mut recv: RecvStream,
    device_id: String,
) -> Result<()> {
    let peer: Arc<EndpointPeer> =
        Arc::new(Peer::new(format!("es:{}", device_id), conn.clone(), send));
    let guard = state.servers.replace(device_id.clone(), peer.clone()).await;
    info!(duid = %device_id, "Endpoint server registered");

    let result = tokio::select! {
        err = peer.serve_commands(&mut recv) => Err(anyhow!(err).context("Command stream ended")),
        err = reject_streams(conn, &device_id) => Err(anyhow!(err).context("Session lost")),
    };

    drop(guard);
    info!(duid = %device_id, "Endpoint server unregistered");
    result
}

/// Endpoint servers never open streams towards the relay; drop any that show up
async fn reject_streams(conn: &Connection, device_id: &str) -> ConnectionError {
    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                warn!(duid = device_id, "Unexpected stream from endpoint server, closing");
                drop(send);
                drop(recv);
            }
            Err(e) => return e,
        }
    }
}

async fn serve_reverse_client(
    state: &Arc<RelayState>,
    conn: &Connection,
    send: SendStream,
    mut recv: RecvStream,
    device_id: String,
    port: u16,
) -> Result<()> {
    let cap = state.config.max_reverse_clients;
    if cap > 0 && state.reverse_clients.len() >= cap {
        bail!("Reverse client limit of {} reached", cap);
    }

    let index = state.next_reverse_index();
    let peer: Arc<EndpointPeer> =
        Arc::new(Peer::new(format!("ec#{}", index), conn.clone(), send));
    let guard = state.reverse_clients.insert(index, peer.clone())?;
    info!(index, duid = %device_id, port, "Reverse client registered");

    let result = tokio::select! {
        err = peer.serve_commands(&mut recv) => Err(anyhow!(err).context("Command stream ended")),
        err = accept_links(state, conn, &device_id, port) => {
            Err(anyhow!(err).context("Session lost"))
        }
    };

    drop(guard);
    info!(index, duid = %device_id, "Reverse client unregistered");
    result
}

async fn accept_links(
    state: &Arc<RelayState>,
    conn: &Connection,
    device_id: &str,
    port: u16,
) -> ConnectionError {
    loop {
        let stream = match conn.accept_bi().await {
            Ok(stream) => stream,
            Err(e) => return e,
        };

        let state = state.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = pair_with_server(&state.servers, &device_id, port, stream).await {
                debug!(duid = %device_id, port, "Pairing ended: {}", e);
            }
        });
    }
}

async fn serve_proxy(
    state: &Arc<RelayState>,
    conn: &Connection,
    send: SendStream,
    mut recv: RecvStream,
    token: String,
) -> Result<()> {
    match state.config.proxy_token.as_deref() {
        Some(expected) if expected == token => {}
        Some(_) => bail!("Proxy token mismatch"),
        None => bail!("Proxy sessions are disabled"),
    }

    let peer: Arc<EndpointPeer> = Arc::new(Peer::new("px", conn.clone(), send));
    let guard = state.proxies.replace(token, peer.clone()).await;
    info!("Proxy client registered from {}", conn.remote_address());

    let result = tokio::select! {
        err = peer.serve_commands(&mut recv) => Err(anyhow!(err).context("Command stream ended")),
        err = accept_proxy_streams(state, conn) => Err(anyhow!(err).context("Session lost")),
    };

    drop(guard);
    info!("Proxy client unregistered");
    result
}

async fn accept_proxy_streams(state: &Arc<RelayState>, conn: &Connection) -> ConnectionError {
    let policy = DestinationPolicy {
        allow_local: state.config.allow_local_destinations,
    };

    loop {
        let stream = match conn.accept_bi().await {
            Ok(stream) => stream,
            Err(e) => return e,
        };

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_proxy_stream(stream, policy, &state.socket_opts).await {
                debug!("Proxy link ended: {:#}", e);
            }
        });
    }
}
