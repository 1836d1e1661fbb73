//! SOCKS5 request parser

use crate::agent::socks::consts::*;
use crate::agent::socks::types::{SocksCommand, SocksRequest, TargetAddr};
use crate::error::{RelayError, Socks5Error};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Parse a SOCKS5 request from the stream
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// Domain names are returned as-is, never resolved locally.
pub async fn parse_command<S>(stream: &mut S) -> Result<SocksRequest, RelayError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let version = header[0];
    let cmd_byte = header[1];
    let addr_type = header[3];

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let command =
        SocksCommand::from_byte(cmd_byte).ok_or(Socks5Error::CommandNotSupported(cmd_byte))?;
    let target = parse_address(stream, addr_type).await?;

    tracing::debug!("Parsed SOCKS5 command: {} to {}", command, target);
    Ok(SocksRequest { command, target })
}

async fn parse_address<S>(stream: &mut S, addr_type: u8) -> Result<TargetAddr, RelayError>
where
    S: AsyncRead + Unpin,
{
    let ip = match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            IpAddr::V4(Ipv4Addr::from(addr))
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            IpAddr::V6(Ipv6Addr::from(addr))
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let domain_len = len[0] as usize;
            if domain_len == 0 || domain_len > MAX_DOMAIN_LEN {
                return Err(Socks5Error::InvalidDomain(format!("length {}", domain_len)).into());
            }

            let mut domain = vec![0u8; domain_len];
            stream.read_exact(&mut domain).await?;
            let domain = String::from_utf8(domain).map_err(|e| {
                Socks5Error::InvalidDomain(String::from_utf8_lossy(e.as_bytes()).into_owned())
            })?;

            let port = read_port(stream).await?;
            return Ok(TargetAddr::Domain(domain, port));
        }
        other => return Err(Socks5Error::AddressTypeNotSupported(other).into()),
    };

    let port = read_port(stream).await?;
    Ok(TargetAddr::from((ip, port)))
}

async fn read_port<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u16, RelayError> {
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}
