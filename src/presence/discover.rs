//! # Discover: presence receiver.
//!
//! Blocking-read loop on the discovery datagram socket. Each datagram is
//! decoded as a [`HostDescriptor`]; our own announcements are ignored,
//! everything else is upserted into the peer table with the packet's source
//! address and a fresh last-seen instant. Malformed or short packets are
//! dropped silently.
//!
//! The socket is (re)bound on every task attempt, so a bind held by a sibling
//! slave on the same host is retried under the service restart policy.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::proto::HostDescriptor;
use crate::registry::Registry;
use crate::tasks::{TaskFn, TaskRef};

/// Maximum datagram size we accept; announcements are one fixed frame.
const MAX_DATAGRAM: usize = 2048;

/// Builds the `discover` service task listening on `port`.
pub fn discover_task(registry: Arc<Registry>, bus: Bus, port: u16) -> TaskRef {
    TaskFn::arc("discover", move |ctx: CancellationToken| {
        run(Arc::clone(&registry), bus.clone(), port, ctx)
    })
}

async fn run(
    registry: Arc<Registry>,
    bus: Bus,
    port: u16,
    ctx: CancellationToken,
) -> Result<(), TaskError> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .map_err(|e| TaskError::io("discover bind", e))?;
    debug!(port, "discover service started");

    // Self-identity is fixed for the lifetime of the process.
    let me = registry.snapshot_host().await;
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = tokio::select! {
            r = socket.recv_from(&mut buf) => {
                r.map_err(|e| TaskError::io("discover recv", e))?
            }
            _ = ctx.cancelled() => return Err(TaskError::Canceled),
        };

        let host = match HostDescriptor::decode(&buf[..len]) {
            Ok(host) => host,
            Err(e) => {
                trace!(%from, error = %e, "dropping malformed announcement");
                continue;
            }
        };

        if host.id == me.id && host.name == me.name {
            continue;
        }

        let identity = host.identity();
        if registry.upsert_peer(host, from.ip()).await {
            bus.publish(Event::now(EventKind::PeerDiscovered).with_peer(&identity));
        }
    }
}
