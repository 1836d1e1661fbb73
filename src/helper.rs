//! Helper utilities for Relaymux
//!
//! This module provides common constants and the stream bridging used by
//! every data path.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Default relay keepalive interval in seconds
pub const DEFAULT_RELAY_KEEPALIVE_SECS: u64 = 10;

/// Default agent keepalive interval in seconds
pub const DEFAULT_AGENT_KEEPALIVE_SECS: u64 = 20;

/// Default delay before an endpoint server retries a failed registration
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 15;

/// Default QUIC idle timeout in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Upper bound on flushing a write half once a bridge ends
pub const BRIDGE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Which side of a bridge stopped first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The `a` side reached EOF or failed
    A,
    /// The `b` side reached EOF or failed
    B,
}

/// Totals reported by [`bridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Side whose read ended the bridge
    pub ended_by: BridgeEnd,
    /// Bytes copied from the ending side before it stopped, if the copy succeeded
    pub bytes: Option<u64>,
}

/// Copy bytes between two duplex endpoints given as split halves
///
/// Both directions run concurrently. The first direction to hit EOF or an
/// error ends the bridge; both write halves are then shut down, waiting at
/// most [`BRIDGE_SHUTDOWN_TIMEOUT`], and all four halves are dropped.
pub async fn bridge<AR, AW, BR, BW>(a: (AR, AW), b: (BR, BW)) -> BridgeStats
where
    AR: AsyncRead + Unpin,
    AW: AsyncWrite + Unpin,
    BR: AsyncRead + Unpin,
    BW: AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = a;
    let (mut b_read, mut b_write) = b;

    let stats = tokio::select! {
        res = tokio::io::copy(&mut a_read, &mut b_write) => finish(BridgeEnd::A, res),
        res = tokio::io::copy(&mut b_read, &mut a_write) => finish(BridgeEnd::B, res),
    };

    let shutdowns = async { tokio::join!(a_write.shutdown(), b_write.shutdown()) };
    if tokio::time::timeout(BRIDGE_SHUTDOWN_TIMEOUT, shutdowns)
        .await
        .is_err()
    {
        trace!("Bridge shutdown timed out");
    }
    stats
}

fn finish(ended_by: BridgeEnd, res: io::Result<u64>) -> BridgeStats {
    match res {
        Ok(n) => {
            trace!(?ended_by, bytes = n, "Bridge direction reached EOF");
            BridgeStats {
                ended_by,
                bytes: Some(n),
            }
        }
        Err(e) => {
            trace!(?ended_by, error = %e, "Bridge direction failed");
            BridgeStats {
                ended_by,
                bytes: None,
            }
        }
    }
}
