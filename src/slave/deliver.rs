//! # Result-send protocol (client side).
//!
//! Symmetric to intake: after connecting to the master we read its initial
//! handshake, then write our descriptor, the result `JobDef`, and the two
//! result blobs, reading a handshake after each frame. Any negative
//! handshake or short write aborts the remainder silently; the master's own
//! watchdog notices the missing result. Sockets and buffers are released by
//! drop on every exit path.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use crate::proto::framing::{expect_accept, write_frame};
use crate::proto::{HostDescriptor, JobDef, ProtoError};
use crate::registry::PeerEntry;

/// Runs the framed result dialogue over an established stream.
pub async fn send_result<S>(
    stream: &mut S,
    me: &HostDescriptor,
    def: &JobDef,
    argout: &[u8],
    options: &[u8],
) -> Result<(), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_accept(stream).await?;

    write_frame(stream, &me.encode()).await?;
    expect_accept(stream).await?;

    write_frame(stream, &def.encode()).await?;
    expect_accept(stream).await?;

    write_frame(stream, argout).await?;
    expect_accept(stream).await?;

    write_frame(stream, options).await?;
    expect_accept(stream).await?;

    Ok(())
}

/// Connects to the master and delivers the result.
///
/// Transport choice mirrors the original: the Unix-domain socket when the
/// master runs on this host and advertises one, TCP to the announced address
/// otherwise. A master advertising neither is unreachable.
pub async fn deliver(
    peer: &PeerEntry,
    me: &HostDescriptor,
    def: &JobDef,
    argout: &[u8],
    options: &[u8],
) -> Result<(), ProtoError> {
    let local = peer.host.name == me.name && !peer.host.socket.is_empty();

    #[cfg(unix)]
    if local {
        debug!(socket = %peer.host.socket, job = def.id, "delivering result over uds");
        let mut stream = UnixStream::connect(&peer.host.socket).await?;
        return send_result(&mut stream, me, def, argout, options).await;
    }
    #[cfg(not(unix))]
    let _ = local;

    if peer.host.port == 0 {
        return Err(ProtoError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "peer advertises no transport",
        )));
    }

    // The announce source address is what we connect back to.
    let addr = (peer.ipaddr, peer.host.port);
    debug!(ip = %addr.0, port = addr.1, job = def.id, "delivering result over tcp");
    let mut stream = TcpStream::connect(addr).await?;
    send_result(&mut stream, me, def, argout, options).await
}
