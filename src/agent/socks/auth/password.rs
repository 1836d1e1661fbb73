//! Username/password authentication (RFC 1929)

use crate::agent::socks::consts::SOCKS5_AUTH_VERSION;
use crate::config::SocksConfig;
use crate::error::{RelayError, Socks5Error};
use crate::protocol::write_all_bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

/// Check the client's credentials against `config`
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub async fn authenticate_password<S>(stream: &mut S, config: &SocksConfig) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    if buf[0] != SOCKS5_AUTH_VERSION {
        send_auth_result(stream, AUTH_FAILURE).await?;
        return Err(Socks5Error::AuthFailed.into());
    }

    let mut username = vec![0u8; buf[1] as usize];
    stream.read_exact(&mut username).await?;

    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut password = vec![0u8; len[0] as usize];
    stream.read_exact(&mut password).await?;

    let accepted = matches!(
        (&config.username, &config.password),
        (Some(u), Some(p)) if u.as_bytes() == username.as_slice() && p.as_bytes() == password.as_slice()
    );

    if accepted {
        send_auth_result(stream, AUTH_SUCCESS).await?;
        tracing::debug!(
            "Authentication successful for user: {}",
            String::from_utf8_lossy(&username)
        );
        Ok(())
    } else {
        send_auth_result(stream, AUTH_FAILURE).await?;
        tracing::warn!(
            "Authentication failed for user: {}",
            String::from_utf8_lossy(&username)
        );
        Err(Socks5Error::AuthFailed.into())
    }
}

async fn send_auth_result<S: AsyncWrite + Unpin>(stream: &mut S, status: u8) -> Result<(), RelayError> {
    write_all_bytes(stream, &[SOCKS5_AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SocksConfig {
        SocksConfig {
            auth_required: true,
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..SocksConfig::new(1080, "token")
        }
    }

    fn credentials(user: &[u8], pass: &[u8]) -> Vec<u8> {
        let mut buf = vec![SOCKS5_AUTH_VERSION, user.len() as u8];
        buf.extend_from_slice(user);
        buf.push(pass.len() as u8);
        buf.extend_from_slice(pass);
        buf
    }

    #[tokio::test]
    async fn test_password_accepted() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&credentials(b"admin", b"secret"))
            .write(&[SOCKS5_AUTH_VERSION, AUTH_SUCCESS])
            .build();

        authenticate_password(&mut stream, &config()).await.unwrap();
    }

    #[tokio::test]
    async fn test_password_rejected() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&credentials(b"admin", b"wrong"))
            .write(&[SOCKS5_AUTH_VERSION, AUTH_FAILURE])
            .build();

        let err = authenticate_password(&mut stream, &config()).await.unwrap_err();
        assert!(matches!(err, RelayError::Socks5(Socks5Error::AuthFailed)));
    }
}
