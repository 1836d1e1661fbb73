//! Session handles and liveness
//!
//! Every registered session is wrapped in a [`Peer`] holding its command
//! stream. The keepalive engine pings peers on a fixed interval and closes
//! any session that stops answering.

mod keepalive;
pub(crate) mod peer;

pub use keepalive::{keepalive_round, run_keepalive};
pub use peer::{
    EndpointPeer, KeepaliveOutcome, Peer, Session, KEEPALIVE_FAILED, MAX_MISSED_PINGS,
    PING_SEND_TIMEOUT,
};
