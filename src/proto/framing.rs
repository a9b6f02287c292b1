//! # Handshake and frame exchange over async streams.
//!
//! Both the intake server and the result-send client speak the same framed
//! dialogue: fixed-size frames (see [`super::wire`]) with a 4-byte
//! little-endian handshake written by the receiver between every frame.
//! Non-zero means proceed, zero means reject and close.
//!
//! These helpers are generic over `AsyncRead`/`AsyncWrite` so the same code
//! serves TCP, Unix-domain sockets, and in-memory duplex streams in tests.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire::{HANDSHAKE_ACCEPT, HANDSHAKE_REJECT};
use super::ProtoError;

/// Writes a 4-byte handshake: `true` → accept, `false` → reject.
pub async fn write_handshake<W>(w: &mut W, accept: bool) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let word = if accept {
        HANDSHAKE_ACCEPT
    } else {
        HANDSHAKE_REJECT
    };
    w.write_all(&word.to_le_bytes()).await?;
    w.flush().await?;
    Ok(())
}

/// Reads a 4-byte handshake; any non-zero value counts as accept.
pub async fn read_handshake<R>(r: &mut R) -> Result<bool, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf) != 0)
}

/// Reads a handshake and maps a rejection to [`ProtoError::Rejected`].
///
/// The result-send client uses this: every negative handshake aborts the
/// remainder of the exchange.
pub async fn expect_accept<R>(r: &mut R) -> Result<(), ProtoError>
where
    R: AsyncRead + Unpin,
{
    if read_handshake(r).await? {
        Ok(())
    } else {
        Err(ProtoError::Rejected)
    }
}

/// Reads exactly `len` bytes, guarding against absurd lengths.
///
/// `max` bounds the allocation; a declared length above it is a protocol
/// error, not an out-of-memory.
pub async fn read_frame<R>(r: &mut R, len: usize, max: usize) -> Result<Vec<u8>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    if len > max {
        return Err(ProtoError::FrameTooLarge { len, max });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes a complete frame.
pub async fn write_frame<W>(w: &mut W, frame: &[u8]) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(frame).await?;
    w.flush().await?;
    Ok(())
}
