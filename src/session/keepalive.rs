//! Periodic keepalive over a set of peers

use super::peer::{KeepaliveOutcome, Peer, Session};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Run one keepalive step for every peer concurrently
pub async fn keepalive_round<S, W>(peers: &[Arc<Peer<S, W>>]) -> Vec<KeepaliveOutcome>
where
    S: Session,
    W: AsyncWrite + Unpin + Send,
{
    join_all(peers.iter().map(|peer| peer.keepalive())).await
}

/// Tick forever, running a keepalive round over whatever `collect` returns
///
/// The first round happens one full interval after start.
pub async fn run_keepalive<S, W, F>(interval: Duration, mut collect: F)
where
    S: Session,
    W: AsyncWrite + Unpin + Send,
    F: FnMut() -> Vec<Arc<Peer<S, W>>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let peers = collect();
        if peers.is_empty() {
            continue;
        }
        let outcomes = keepalive_round(&peers).await;
        let expired = outcomes
            .iter()
            .filter(|o| **o == KeepaliveOutcome::Expired)
            .count();
        debug!(peers = peers.len(), expired, "Keepalive round finished");
    }
}
