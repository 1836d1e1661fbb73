//! Registered sessions held by an agent
//!
//! An endpoint client keeps at most one session per role. TCP connections
//! accepted concurrently share it; the first one to find it missing or
//! closed registers a new one while the others wait.

use crate::protocol::{write_message, Registration, Role};
use crate::session::{EndpointPeer, Peer};
use crate::transport::{AddrMaybeCached, Dialer};
use anyhow::{Context, Result};
use quinn::RecvStream;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Reason sent when the command stream of an agent session ends
pub const COMMAND_STREAM_CLOSED: &str = "command stream closed";

fn label(registration: &Registration) -> String {
    match registration.role {
        // never log the proxy token
        Role::Proxy => Role::Proxy.to_string(),
        role => format!("{}:{}", role, registration.duid),
    }
}

/// Dial the relay and register
///
/// Returns the handle and the read half of its command stream, which the
/// caller is expected to serve.
pub async fn register(
    dialer: &Dialer,
    relay: &AddrMaybeCached,
    registration: &Registration,
) -> Result<(Arc<EndpointPeer>, RecvStream)> {
    let conn = dialer.dial(relay).await?;
    let (mut send, recv) = conn
        .open_bi()
        .await
        .context("Failed to open command stream")?;

    write_message(&mut send, registration)
        .await
        .context("Failed to send registration")?;

    let peer = Arc::new(Peer::new(label(registration), conn, send));
    debug!(peer = peer.label(), "Registered with relay {}", relay.addr());
    Ok((peer, recv))
}

/// One lazily registered session
pub struct SessionSlot {
    registration: Registration,
    current: Mutex<Option<Arc<EndpointPeer>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl SessionSlot {
    /// Create an empty slot for `registration`
    pub fn new(registration: Registration) -> Self {
        SessionSlot {
            registration,
            current: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        }
    }

    /// Registration sent on every (re)connect
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<EndpointPeer>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The current session, unless it has closed
    pub fn peer(&self) -> Option<Arc<EndpointPeer>> {
        self.lock_current()
            .as_ref()
            .filter(|peer| !peer.is_closed())
            .cloned()
    }

    /// Return the live session, registering a new one if needed
    pub async fn get_or_connect(
        &self,
        dialer: &Dialer,
        relay: &AddrMaybeCached,
    ) -> Result<Arc<EndpointPeer>> {
        if let Some(peer) = self.peer() {
            return Ok(peer);
        }

        let _connecting = self.connecting.lock().await;
        if let Some(peer) = self.peer() {
            return Ok(peer);
        }

        let (peer, mut recv) = register(dialer, relay, &self.registration).await?;
        info!(peer = peer.label(), "Session registered");

        let serving = peer.clone();
        tokio::spawn(async move {
            let err = serving.serve_commands(&mut recv).await;
            debug!(peer = serving.label(), "Command stream ended: {}", err);
            serving.force_close(COMMAND_STREAM_CLOSED);
        });

        *self.lock_current() = Some(peer.clone());
        Ok(peer)
    }

    /// Close and forget the current session
    pub fn close(&self, reason: &str) {
        if let Some(peer) = self.lock_current().take() {
            peer.force_close(reason);
        }
    }
}
