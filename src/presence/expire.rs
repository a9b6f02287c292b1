//! # Expire: peer table sweeper.
//!
//! Every sweep period, drops peers whose last announcement is older than the
//! expiry threshold. Eviction is idempotent; after a sweep no surviving entry
//! is older than the expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::registry::Registry;
use crate::tasks::{TaskFn, TaskRef};

/// Builds the `expire` service task.
pub fn expire_task(
    registry: Arc<Registry>,
    bus: Bus,
    sweep_every: Duration,
    expiry: Duration,
) -> TaskRef {
    TaskFn::arc("expire", move |ctx: CancellationToken| {
        run(Arc::clone(&registry), bus.clone(), sweep_every, expiry, ctx)
    })
}

async fn run(
    registry: Arc<Registry>,
    bus: Bus,
    sweep_every: Duration,
    expiry: Duration,
    ctx: CancellationToken,
) -> Result<(), TaskError> {
    debug!(?sweep_every, ?expiry, "expire service started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(sweep_every) => {}
            _ = ctx.cancelled() => return Err(TaskError::Canceled),
        }

        for evicted in registry.sweep_peers(expiry).await {
            bus.publish(Event::now(EventKind::PeerExpired).with_peer(evicted.host.identity()));
        }
    }
}
