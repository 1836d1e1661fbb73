//! Endpoint handles
//!
//! A [`Peer`] is one registered session as seen from either end: the
//! session itself, the write half of its command stream and the keepalive
//! miss counter. The relay and both agents use the same type.

use crate::directory::Registrant;
use crate::error::RelayError;
use crate::protocol::{decode, read_message, write_message, ControlCommand};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Unanswered pings tolerated before a session is closed
pub const MAX_MISSED_PINGS: u32 = 3;

/// Upper bound on a single ping write
///
/// A ping that misses it may be half written, so the session is closed.
pub const PING_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Reason sent when the keepalive gives up on a session
pub const KEEPALIVE_FAILED: &str = "keepalive failed";

/// A multiplexed session that can be torn down with a reason
pub trait Session: Send + Sync + 'static {
    /// Close the session; every stream on it fails afterwards
    fn close_with_reason(&self, reason: &str);

    /// Whether the session has been closed by either side
    fn is_closed(&self) -> bool;
}

impl Session for quinn::Connection {
    fn close_with_reason(&self, reason: &str) {
        self.close(quinn::VarInt::from_u32(0), reason.as_bytes());
    }

    fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }
}

/// Handle type used over QUIC
pub type EndpointPeer = Peer<quinn::Connection, quinn::SendStream>;

/// Result of one keepalive tick for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveOutcome {
    /// Peer already closed
    Skipped,
    /// Ping written
    Pinged,
    /// Ping could not be written
    SendFailed,
    /// Too many unanswered pings, or a ping write stalled; the session was closed
    Expired,
}

/// A registered session and its command stream
pub struct Peer<S, W> {
    label: String,
    session: S,
    command: Mutex<W>,
    missed_pings: AtomicU32,
    closed: AtomicBool,
}

impl<S, W> Peer<S, W>
where
    S: Session,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a session and the write half of its command stream
    pub fn new(label: impl Into<String>, session: S, command: W) -> Self {
        Peer {
            label: label.into(),
            session,
            command: Mutex::new(command),
            missed_pings: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Label used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The underlying session
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Pings sent since the last pong
    pub fn missed_pings(&self) -> u32 {
        self.missed_pings.load(Ordering::SeqCst)
    }

    /// Whether this peer was force-closed or its session is gone
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.session.is_closed()
    }

    /// Close the session with `reason`
    pub fn force_close(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(peer = %self.label, reason, "Closing session");
        }
        self.session.close_with_reason(reason);
    }

    /// Write one control message on the command stream
    ///
    /// Refused once the peer has been force-closed.
    pub async fn send(&self, cmd: &ControlCommand) -> Result<(), RelayError> {
        let mut writer = self.command.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Transport(format!(
                "command stream of {} is closed",
                self.label
            )));
        }
        write_message(&mut *writer, cmd).await
    }

    /// Record a pong
    pub fn on_pong(&self) {
        self.missed_pings.store(0, Ordering::SeqCst);
    }

    /// Run one keepalive step
    pub async fn keepalive(&self) -> KeepaliveOutcome {
        if self.is_closed() {
            return KeepaliveOutcome::Skipped;
        }

        let missed = self.missed_pings();
        if missed > MAX_MISSED_PINGS {
            warn!(peer = %self.label, missed, "No pong received, giving up");
            self.force_close(KEEPALIVE_FAILED);
            return KeepaliveOutcome::Expired;
        }

        match tokio::time::timeout(PING_SEND_TIMEOUT, self.send(&ControlCommand::Ping)).await {
            Ok(Ok(())) => {
                self.missed_pings.fetch_add(1, Ordering::SeqCst);
                trace!(peer = %self.label, "Ping sent");
                KeepaliveOutcome::Pinged
            }
            Ok(Err(e)) => {
                debug!(peer = %self.label, error = %e, "Failed to send ping");
                KeepaliveOutcome::SendFailed
            }
            Err(_) => {
                warn!(peer = %self.label, "Timed out sending ping");
                self.force_close(KEEPALIVE_FAILED);
                KeepaliveOutcome::Expired
            }
        }
    }

    /// Serve the read half of the command stream until it fails
    ///
    /// Answers pings, resets the miss counter on pongs and skips anything
    /// it cannot decode. Returns the error that ended the loop.
    pub async fn serve_commands<R>(&self, reader: &mut R) -> RelayError
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            let payload = match read_message(&mut *reader).await {
                Ok(payload) => payload,
                Err(e) => return e,
            };

            match decode::<ControlCommand>(&payload) {
                Ok(ControlCommand::Ping) => {
                    trace!(peer = %self.label, "Ping received");
                    if let Err(e) = self.send(&ControlCommand::Pong).await {
                        return e;
                    }
                }
                Ok(ControlCommand::Pong) => {
                    trace!(peer = %self.label, "Pong received");
                    self.on_pong();
                }
                Err(e) => {
                    warn!(
                        peer = %self.label,
                        error = %e,
                        "Ignoring unrecognized command: {}",
                        String::from_utf8_lossy(&payload)
                    );
                }
            }
        }
    }
}

impl<S, W> Registrant for Peer<S, W>
where
    S: Session,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn evict(&self, reason: &str) {
        self.force_close(reason);
    }
}
