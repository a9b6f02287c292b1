//! # Supervisor: restart-on-exit manager for child slaves.
//!
//! The parent process never serves jobs itself. It keeps a circular list of
//! child slots, one per configured slave, and tends **exactly one slot per
//! 250ms tick**:
//!
//! - slot occupied → non-blocking reap; an exited or signaled child empties
//!   the slot so its next turn respawns it;
//! - slot empty → bump the shared host id, spawn a child process (this same
//!   executable re-entering slave mode);
//! - advance the cursor to the next slot and sleep out the tick.
//!
//! A crashed child therefore waits at most one full trip around the list
//! before it is respawned; respawn latency grows with the child count.
//! Host ids increase strictly across all children of one supervisor, making
//! every (re)incarnation unique per boot. A spawn failure is fatal. Children
//! are spawned with `kill_on_drop`, so dropping the supervisor (shutdown
//! signal) takes the children down too; a crashed child never harms its
//! siblings.

use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RuntimeError;

/// Tick length of the tend loop; one slot is handled per tick.
const TICK: Duration = Duration::from_millis(250);

/// Builds the command for one child given `(config_index, host_id)`.
pub type ChildSpawner = Box<dyn Fn(usize, u32) -> Command + Send>;

/// One supervised child slave.
struct ChildSlot {
    /// Index into the configuration list, passed back to the spawner.
    config_index: usize,
    /// The running child, or `None` when (re)spawn is due.
    child: Option<Child>,
}

/// Restart-on-exit process manager.
pub struct Supervisor {
    slots: Vec<ChildSlot>,
    spawner: ChildSpawner,
    next_id: u32,
    /// Position of the slot to tend on the next tick.
    cursor: usize,
}

impl Supervisor {
    /// Creates a supervisor for `count` children.
    pub fn new(count: usize, spawner: ChildSpawner) -> Self {
        let slots = (0..count)
            .map(|config_index| ChildSlot {
                config_index,
                child: None,
            })
            .collect();
        Self {
            slots,
            spawner,
            next_id: 0,
            cursor: 0,
        }
    }

    /// The id the next spawned child will receive.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Runs the supervision loop until cancellation.
    ///
    /// Returns an error only when a spawn fails; everything else is handled
    /// by respawning.
    pub async fn run(&mut self, ctx: CancellationToken) -> Result<(), RuntimeError> {
        if self.slots.is_empty() {
            return Ok(());
        }
        info!(children = self.slots.len(), "supervisor started");

        loop {
            if ctx.is_cancelled() {
                info!("supervisor shutting down");
                return Ok(());
            }

            self.tend_current_slot()?;
            self.cursor = (self.cursor + 1) % self.slots.len();

            tokio::select! {
                _ = tokio::time::sleep(TICK) => {}
                _ = ctx.cancelled() => {}
            }
        }
    }

    /// Reaps and, if the slot is empty afterwards, respawns the child under
    /// the cursor.
    fn tend_current_slot(&mut self) -> Result<(), RuntimeError> {
        let slot = &mut self.slots[self.cursor];

        // Non-blocking reap of a running child.
        if let Some(child) = slot.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(slot = slot.config_index, %status, "child exited");
                    slot.child = None;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(slot = slot.config_index, error = %e, "reap failed");
                    slot.child = None;
                }
            }
        }

        if slot.child.is_none() {
            // Unique per boot: strictly increasing across respawns.
            self.next_id += 1;
            let mut cmd = (self.spawner)(slot.config_index, self.next_id);
            cmd.kill_on_drop(true);
            let child = cmd.spawn()?;
            info!(
                slot = slot.config_index,
                id = self.next_id,
                pid = child.id(),
                "started child slave"
            );
            slot.child = Some(child);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[cfg(unix)]
    #[tokio::test]
    async fn exiting_children_are_respawned_with_fresh_ids() {
        let mut sup = Supervisor::new(
            1,
            Box::new(|_idx, _id| {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg("exit 1");
                cmd
            }),
        );
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(900)).await;
            canceller.cancel();
        });

        sup.run(ctx).await.unwrap();
        // The child exits immediately, so several incarnations fit into the
        // window and each one consumed a fresh id.
        assert!(sup.next_id() >= 2, "next_id = {}", sup.next_id());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slots_are_tended_one_per_tick_in_order() {
        let spawned: Arc<Mutex<Vec<(usize, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&spawned);
        let mut sup = Supervisor::new(
            2,
            Box::new(move |idx, id| {
                record.lock().unwrap().push((idx, id));
                let mut cmd = Command::new("sleep");
                cmd.arg("60");
                cmd
            }),
        );
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            canceller.cancel();
        });

        sup.run(ctx).await.unwrap();

        // One slot per tick: the second slot starts a tick after the first,
        // and ids are handed out in spawn order.
        let spawned = spawned.lock().unwrap();
        assert_eq!(spawned[0], (0, 1));
        assert_eq!(spawned[1], (1, 2));
    }

    #[tokio::test]
    async fn unspawnable_child_is_fatal() {
        let mut sup = Supervisor::new(
            1,
            Box::new(|_idx, _id| Command::new("/nonexistent/peervisor-child")),
        );
        let err = sup.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::SpawnFailed(_)));
    }
}
