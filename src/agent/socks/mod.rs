//! SOCKS5 front-end
//!
//! Runs the SOCKS5 handshake on a local TCP connection. What happens to an
//! accepted CONNECT is up to the caller; the endpoint client forwards it as
//! a proxy link stream.

pub mod auth;
pub mod command;
pub mod consts;
mod types;

pub use types::{SocksCommand, SocksRequest, TargetAddr};

use crate::config::SocksConfig;
use crate::error::{RelayError, Socks5ReplyCode};
use command::{parse_command, send_reply};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Authenticate the client and read its request
///
/// A malformed or unsupported request is answered with the matching
/// failure reply before the error is returned. BIND and UDP ASSOCIATE are
/// returned like CONNECT; see [`refuse`].
pub async fn handshake<S>(stream: &mut S, config: &SocksConfig) -> Result<SocksRequest, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let method = auth::authenticate(stream, config).await?;
    debug!("Authentication completed with method: {:?}", method);

    match parse_command(stream).await {
        Ok(request) => Ok(request),
        Err(RelayError::Socks5(e)) => {
            send_reply(stream, Socks5ReplyCode::from(&e), None).await?;
            Err(e.into())
        }
        Err(e) => Err(e),
    }
}

/// Answer a request the front-end does not serve
pub async fn refuse<S>(stream: &mut S, code: Socks5ReplyCode) -> Result<(), RelayError>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, code, None).await
}

/// Confirm a CONNECT
pub async fn accept<S>(stream: &mut S) -> Result<(), RelayError>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, Socks5ReplyCode::Succeeded, None).await
}
