//! Protocol codec for framed control messages
//!
//! A frame is a 2-byte little-endian length followed by that many bytes of
//! UTF-8 JSON. Bulk link data never goes through this codec.

use crate::error::RelayError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Largest payload a frame can carry
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Serialize `message` and write it as one frame, then flush
///
/// An oversized payload fails before anything is written.
pub async fn write_message<W, T>(conn: &mut W, message: &T) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(RelayError::MessageTooLarge(payload.len()));
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(&payload);

    trace!("Write frame of length {}", payload.len());
    write_all_bytes(conn, &buf).await?;
    conn.flush().await?;
    Ok(())
}

/// Read one frame and return its raw payload
///
/// Closure or a short read at any point is an I/O error.
pub async fn read_message<R>(conn: &mut R) -> Result<Vec<u8>, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    conn.read_exact(&mut len_buf).await?;
    let len = u16::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    conn.read_exact(&mut payload).await?;
    trace!("Read frame of length {}", len);
    Ok(payload)
}

/// Decode a frame payload into a message
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, RelayError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read one frame and decode it
pub async fn read_json<R, T>(conn: &mut R) -> Result<T, RelayError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let payload = read_message(conn).await?;
    decode(&payload)
}

/// Write the whole buffer, looping over partial writes
pub async fn write_all_bytes<W>(conn: &mut W, mut buf: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while !buf.is_empty() {
        let n = conn.write(buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "connection accepted zero bytes",
            ));
        }
        buf = &buf[n..];
    }
    Ok(())
}
