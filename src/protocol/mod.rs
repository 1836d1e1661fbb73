//! Protocol module for Relaymux
//!
//! This module implements the length-prefixed JSON framing shared by the
//! relay and both endpoint agents, and the messages carried in it.

mod codec;
mod types;

pub use codec::{
    decode, read_json, read_message, write_all_bytes, write_message, LENGTH_PREFIX_LEN,
    MAX_MESSAGE_LEN,
};
pub use types::{ControlCommand, LinkHeader, Registration, Role};
