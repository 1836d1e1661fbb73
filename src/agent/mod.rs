//! Endpoint agents
//!
//! The endpoint server exposes local TCP services through the relay; the
//! endpoint client reaches them, and optionally arbitrary destinations
//! through a SOCKS5 front-end.

mod client;
mod server;
mod slot;
pub mod socks;

pub use client::ClientAgent;
pub use server::{serve_link, ServerAgent};
pub use slot::{register, SessionSlot, COMMAND_STREAM_CLOSED};
