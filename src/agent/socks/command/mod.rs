//! SOCKS5 requests and replies

mod parser;
mod reply;

pub use parser::parse_command;
pub use reply::{build_reply, send_reply};
