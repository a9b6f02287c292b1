//! # Service health ledger.
//!
//! The runtime drives a small fixed set of services: announce, discover,
//! expire, the two intake listeners, and the slave loop. This ledger is
//! seeded with exactly those names before the actors start and follows their
//! lifecycle events, so that shutdown can name the services that refused to
//! stop and a restart storm shows up as a climbing start counter.
//!
//! ## Rules
//! - Only registered services are tracked; events about unknown names are
//!   dropped.
//! - A service counts as running from `TaskStarting` until its terminal
//!   event (`TaskStopped`, `TaskFailed`, `ActorExhausted`, `ActorDead`).
//! - Out-of-order delivery is handled with event sequence numbers: an event
//!   older than the last one applied to a service is dropped.
//! - Entries live in a `Vec` in registration order and are found by linear
//!   scan; the set never grows past the handful of fixed services.

use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

/// Lifecycle record for one registered service.
#[derive(Debug, Clone, Default)]
struct ServiceState {
    /// Service name as it appears in events.
    name: String,
    /// Whether the service is currently between start and terminal event.
    running: bool,
    /// How many times the service has started; 1 means never restarted.
    starts: u64,
    /// Sequence number of the last applied event.
    last_seq: u64,
}

/// Follows the fixed service set through its lifecycle events.
pub struct ServiceHealth {
    services: RwLock<Vec<ServiceState>>,
}

impl ServiceHealth {
    /// Creates an empty ledger; seed it with [`register`](Self::register).
    pub fn new() -> Self {
        Self {
            services: RwLock::new(Vec::new()),
        }
    }

    /// Registers a service name. Idempotent; registration order is kept.
    pub async fn register(&self, name: &str) {
        let mut services = self.services.write().await;
        if services.iter().any(|s| s.name == name) {
            return;
        }
        services.push(ServiceState {
            name: name.to_string(),
            ..ServiceState::default()
        });
    }

    /// Applies a lifecycle event to the ledger.
    ///
    /// Events that carry no service name, name an unregistered service, or
    /// arrive out of order (stale sequence number) are dropped.
    pub async fn observe(&self, ev: &Event) {
        let transition = match ev.kind {
            EventKind::TaskStarting => Some(true),
            EventKind::TaskStopped
            | EventKind::TaskFailed
            | EventKind::ActorExhausted
            | EventKind::ActorDead => Some(false),
            _ => None,
        };
        let Some(running) = transition else {
            return;
        };
        let Some(name) = ev.task.as_deref() else {
            return;
        };

        let mut services = self.services.write().await;
        let Some(state) = services.iter_mut().find(|s| s.name == name) else {
            return;
        };
        if ev.seq <= state.last_seq {
            return;
        }
        if running && !state.running {
            state.starts += 1;
        }
        state.running = running;
        state.last_seq = ev.seq;
    }

    /// Names of the services still running, in registration order.
    ///
    /// The shutdown path reports these as stuck when the grace period runs
    /// out.
    pub async fn running(&self) -> Vec<String> {
        self.services
            .read()
            .await
            .iter()
            .filter(|s| s.running)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Whether the named service is currently running.
    pub async fn is_running(&self, name: &str) -> bool {
        self.services
            .read()
            .await
            .iter()
            .any(|s| s.name == name && s.running)
    }

    /// How many times the named service has started; 0 for unknown services.
    pub async fn starts(&self, name: &str) -> u64 {
        self.services
            .read()
            .await
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.starts)
            .unwrap_or(0)
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}
