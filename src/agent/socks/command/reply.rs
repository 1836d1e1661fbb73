//! SOCKS5 reply builder

use crate::agent::socks::consts::*;
use crate::error::{RelayError, Socks5ReplyCode};
use crate::protocol::write_all_bytes;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encode a reply
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// Without a bound address, `0.0.0.0:0` is reported.
pub fn build_reply(code: Socks5ReplyCode, bind_addr: Option<SocketAddr>) -> Vec<u8> {
    let bind_addr = bind_addr.unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

    let mut reply = vec![SOCKS5_VERSION, code.into(), SOCKS5_RESERVED];
    match bind_addr {
        SocketAddr::V4(addr) => {
            reply.push(SOCKS5_ADDR_TYPE_IPV4);
            reply.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            reply.push(SOCKS5_ADDR_TYPE_IPV6);
            reply.extend_from_slice(&addr.ip().octets());
        }
    }
    reply.extend_from_slice(&bind_addr.port().to_be_bytes());
    reply
}

/// Write a reply and flush it
pub async fn send_reply<S>(
    stream: &mut S,
    code: Socks5ReplyCode,
    bind_addr: Option<SocketAddr>,
) -> Result<(), RelayError>
where
    S: AsyncWrite + Unpin,
{
    write_all_bytes(stream, &build_reply(code, bind_addr)).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_reply_default_address() {
        let reply = build_reply(Socks5ReplyCode::Succeeded, None);
        assert_eq!(reply, vec![5, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_build_reply_ipv6() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        let reply = build_reply(Socks5ReplyCode::CommandNotSupported, Some(addr));

        assert_eq!(reply.len(), 4 + 16 + 2);
        assert_eq!(reply[1], 0x07);
        assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV6);
        assert_eq!(&reply[20..], &8080u16.to_be_bytes());
    }
}
