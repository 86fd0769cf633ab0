//! Length-prefixed message framing.
//!
//! A frame on the wire is `<length: u32 big-endian><body: length bytes>`.
//! The length is strictly positive and bounded by [`MAX_FRAME_LEN`]; a zero
//! or oversized length is treated as a protocol violation, not a recoverable
//! condition, because the stream can no longer be trusted to be in sync.
//! Reads and writes are fully reliable: short reads/writes are looped by
//! `read_exact`/`write_all`, and a peer closing mid-frame surfaces as
//! `UnexpectedEof`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a frame body, in bytes.
pub const MAX_FRAME_LEN: usize = 65536;

/// Writes one framed message.
///
/// Returns `InvalidInput` without touching the stream if the body is empty
/// or larger than [`MAX_FRAME_LEN`].
pub async fn write_frame<W>(writer: &mut W, body: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = body.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame body of {} bytes is outside 1..={}", bytes.len(), MAX_FRAME_LEN),
        ));
    }
    let len = (bytes.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.
///
/// Returns `InvalidData` on a zero or oversized length header and on a body
/// that is not valid UTF-8 (all protocol messages are ASCII text).
pub async fn read_frame<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} is outside 1..={}", len, MAX_FRAME_LEN),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    String::from_utf8(body)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame body is not valid UTF-8"))
}
