//! SOCKS5 authentication
//!
//! Method negotiation followed by RFC 1929 username/password when the
//! front-end is configured to require it.

mod password;

pub use password::authenticate_password;

use super::consts::*;
use crate::config::SocksConfig;
use crate::error::{RelayError, Socks5Error};
use crate::protocol::write_all_bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Authentication method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    None,
    /// Username/password authentication
    Password,
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::None => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Password => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }
}

/// Negotiate a method and run it
///
/// Returns the method that was used once the client is authenticated.
pub async fn authenticate<S>(stream: &mut S, config: &SocksConfig) -> Result<AuthMethod, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    let num_methods = buf[1];

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let mut methods = vec![0u8; num_methods as usize];
    stream.read_exact(&mut methods).await?;

    let selected = select_auth_method(&methods, config);
    let reply = selected
        .map(|m| m.to_byte())
        .unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE);
    write_all_bytes(stream, &[SOCKS5_VERSION, reply]).await?;
    stream.flush().await?;

    let method = selected.ok_or(Socks5Error::NoAcceptableMethod)?;
    if method == AuthMethod::Password {
        authenticate_password(stream, config).await?;
    }

    Ok(method)
}

fn select_auth_method(methods: &[u8], config: &SocksConfig) -> Option<AuthMethod> {
    if config.auth_required {
        if methods.contains(&SOCKS5_AUTH_METHOD_PASSWORD) {
            return Some(AuthMethod::Password);
        }
    } else {
        if methods.contains(&SOCKS5_AUTH_METHOD_NONE) {
            return Some(AuthMethod::None);
        }
        if methods.contains(&SOCKS5_AUTH_METHOD_PASSWORD) && config.has_credentials() {
            return Some(AuthMethod::Password);
        }
    }

    None
}
