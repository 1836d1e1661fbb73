//! # Relaymux - Multiplexed Tunneling Relay
//!
//! Relaymux lets a TCP service on a device behind NAT be reached from
//! elsewhere through a publicly reachable relay. Every party keeps one
//! long-lived QUIC session with the relay; each TCP connection travels as
//! its own stream inside that session.
//!
//! ## Roles
//!
//! - **Relay**: accepts sessions, keeps the endpoint directory and pairs
//!   link streams between reverse clients and endpoint servers
//! - **Endpoint server** (`es`): registers under a device id and dials the
//!   requested local port for every link stream it receives
//! - **Endpoint client** (`ec`): forwards local TCP connections to the
//!   endpoint server registered under a device id
//! - **Proxy client** (`px`): the endpoint client's SOCKS5 front-end; the
//!   relay dials the requested destination itself
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relaymux::config::{RelayConfig, TransportConfig};
//! use relaymux::relay::Relay;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let relay = Relay::bind(RelayConfig::default(), &TransportConfig::default()).await?;
//!     let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     relay.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Data path
//!
//! Registrations, link headers and keepalive commands are JSON objects
//! behind a two-byte little-endian length prefix. After a link header the
//! stream carries raw bytes:
//!
//! ```text
//! Endpoint client -> Relay -> Endpoint server -> 127.0.0.1:port
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod config;
pub mod directory;
pub mod error;
pub mod helper;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

// Re-export commonly used items
pub use agent::{ClientAgent, ServerAgent};
pub use config::{load_config, Config};
pub use error::{RelayError, Socks5Error};
pub use relay::Relay;

/// Version of the Relaymux library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
