//! Transport layer for chat connections.
//!
//! Every message on the wire is a frame: a 4-byte big-endian length followed by
//! that many payload bytes. Before the handshake completes the payload is a JSON
//! handshake message; afterwards it is session ciphertext.

mod tcp;

pub use tcp::{FrameReader, FrameWriter, TcpConnection, TcpListener};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::chat::error::ChatError;

/// Largest payload accepted in a single frame (10 MiB).
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Length of the frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Trait for bidirectional async frame transport.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one frame.
    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ChatError>;

    /// Receive one frame. `Ok(None)` means the peer closed cleanly between frames.
    async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, ChatError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), ChatError>;

    /// Get the peer address as a string.
    fn peer_addr(&self) -> String;
}

/// Write one length-prefixed frame.
///
/// Header and payload go out in a single `write_all` so concurrent writers on
/// other connections can never interleave partial frames.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ChatError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ChatError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` if the stream ends before the first header byte. A stream
/// that ends inside the header or the payload is a transport error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ChatError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ChatError::TransportError(format!(
                "Connection closed inside frame header ({} of {} bytes)",
                filled, FRAME_HEADER_LEN
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChatError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ChatError::TransportError(format!(
                "Connection closed inside frame payload (expected {} bytes)",
                len
            ))
        } else {
            ChatError::IoError(e)
        }
    })?;
    Ok(Some(payload))
}
