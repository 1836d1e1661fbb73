//! Transport module for Relaymux
//!
//! QUIC carries every relay session; plain TCP is only used for the local
//! connections at either end of a tunnel and for proxy egress.

mod addr;
mod quic;
mod tcp;

pub use addr::AddrMaybeCached;
pub use quic::{configure_client, configure_server, server_endpoint, Dialer, SERVER_NAME};
pub use tcp::{connect_tcp, SocketOpts, DEFAULT_CONNECT_TIMEOUT};
