//! # Announce: periodic presence broadcast.
//!
//! The [`Announcer`] owns the outbound datagram socket and serializes the
//! current (smart-adjusted) host descriptor to every configured destination.
//! Two entry points:
//!
//! - [`Announcer::announce_once`]: one immediate send, invoked after every
//!   status change (the descriptor is snapshotted under the host lock, the
//!   send happens after release).
//! - [`Announcer::into_task`]: the periodic service. Once the peer table
//!   grows past [`LARGE_TABLE`], each period is stretched by a random amount
//!   up to +50% so large meshes don't synchronize their broadcast bursts.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::TaskError;
use crate::policies::JitterPolicy;
use crate::registry::Registry;
use crate::tasks::{TaskFn, TaskRef};

/// Peer-table size beyond which the announce period gains jitter.
pub const LARGE_TABLE: usize = 64;

/// Owns the announce socket and the destination list.
pub struct Announcer {
    registry: Arc<Registry>,
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
}

impl Announcer {
    /// Binds the outbound datagram socket and enables broadcast.
    pub async fn bind(
        registry: Arc<Registry>,
        targets: Vec<SocketAddr>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            registry,
            socket,
            targets,
        })
    }

    /// Serializes the advertised descriptor and sends one datagram to each
    /// destination.
    ///
    /// Send failures are logged and swallowed; presence is best-effort and
    /// the next period retries anyway.
    pub async fn announce_once(&self) {
        let host = self.registry.advertised_host().await;
        let frame = host.encode();
        for dest in &self.targets {
            if let Err(e) = self.socket.send_to(&frame, dest).await {
                warn!(%dest, error = %e, "announce send failed");
            } else {
                trace!(%dest, status = host.status.as_label(), "announced");
            }
        }
    }

    /// Wraps the announcer into the periodic `announce` service task.
    pub fn into_task(self: Arc<Self>, period: Duration) -> TaskRef {
        TaskFn::arc("announce", move |ctx: CancellationToken| {
            Arc::clone(&self).run(period, ctx)
        })
    }

    async fn run(
        self: Arc<Self>,
        period: Duration,
        ctx: CancellationToken,
    ) -> Result<(), TaskError> {
        debug!(targets = self.targets.len(), "announce service started");
        loop {
            if ctx.is_cancelled() {
                return Err(TaskError::Canceled);
            }
            self.announce_once().await;

            let mut delay = period;
            if self.registry.peer_count().await > LARGE_TABLE {
                delay += JitterPolicy::Full.apply(period / 2);
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return Err(TaskError::Canceled),
            }
        }
    }
}
