//! # Runtime: orchestrates service actors and graceful shutdown.
//!
//! The [`Runtime`] owns the event bus, subscriber fan-out and health ledger,
//! and drives the fixed set of peervisor services from spawn to termination.
//!
//! ## Architecture
//! ```text
//! TaskSpec[] ──► Runtime::run()
//!                     │
//!                     ├──► seed ServiceHealth with the service names
//!                     │
//!                     ├──► spawn TaskActor per spec
//!                     │         └──► publishes events to Bus
//!                     │
//!                     ├──► subscriber_listener()
//!                     │         ├──► updates ServiceHealth
//!                     │         └──► fans out to SubscriberSet
//!                     │
//!                     └──► wait for:
//!                           ├──► all actors exit (Ok)
//!                           ├──► a service dies fatally (Err(ServiceDead))
//!                           └──► OS signal → graceful shutdown
//!                                 ├──► cancel all actors
//!                                 ├──► wait up to grace period
//!                                 └──► check stuck services (ServiceHealth)
//! ```
//!
//! ## Rules
//! - Health tracking uses **sequence numbers** (handles out-of-order events)
//! - Subscriber fan-out is **non-blocking** (per-subscriber queues)
//! - Graceful shutdown waits **at most** [`RuntimeConfig::grace`]
//! - A fatal service death (`ActorDead`) cancels every other service; the
//!   caller turns the error into a non-zero process exit so the parent
//!   supervisor respawns the slave

use std::sync::Arc;
use std::time::Duration;

use tokio::{task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    error::RuntimeError,
    events::{Bus, Event, EventKind},
    runtime::{
        actor::{TaskActor, TaskActorParams},
        health::ServiceHealth,
        shutdown,
    },
    subscribers::{Subscribe, SubscriberSet},
    tasks::TaskSpec,
};

/// Settings for the supervision runtime.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum time to wait for graceful shutdown before force-terminating.
    pub grace: Duration,
    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Default for RuntimeConfig {
    /// `grace = 10s`, `bus_capacity = 1024`.
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
        }
    }
}

/// Orchestrates service actors, event delivery, and graceful shutdown.
pub struct Runtime {
    /// Runtime configuration.
    cfg: RuntimeConfig,
    /// Event bus shared with all actors.
    bus: Bus,
    /// Fan-out set for subscribers.
    subs: Arc<SubscriberSet>,
    /// Health ledger of the fixed service set, for stuck detection.
    health: Arc<ServiceHealth>,
}

impl Runtime {
    /// Creates a new runtime with the given config and subscribers (maybe empty).
    pub fn new(cfg: RuntimeConfig, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));

        Self {
            cfg,
            bus,
            subs,
            health: Arc::new(ServiceHealth::new()),
        }
    }

    /// Returns a handle to the event bus for service constructors.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Runs the service specifications until completion, fatal service death,
    /// or a shutdown signal.
    ///
    /// ### Exit conditions
    /// - **All actors exit naturally** → `Ok(())`
    /// - **A service dies fatally** → cancel the rest, `Err(ServiceDead)`
    /// - **OS signal received** → graceful shutdown: cancel all actors, wait
    ///   up to [`RuntimeConfig::grace`], `Ok(())` if all stopped within grace,
    ///   `Err(GraceExceeded)` with the stuck service names otherwise
    pub async fn run(&self, tasks: Vec<TaskSpec>) -> Result<(), RuntimeError> {
        let runtime_token = CancellationToken::new();

        // The service set is fixed; seed the health ledger before any actor
        // can publish.
        for spec in &tasks {
            self.health.register(spec.task().name()).await;
        }

        // Spawn listener before actors to avoid missing early events.
        self.subscriber_listener();

        let mut set = JoinSet::new();
        self.spawn_task_actors(&mut set, &runtime_token, tasks);
        self.drive_shutdown(&mut set, &runtime_token).await
    }

    /// Returns the names of the services currently running.
    pub async fn running(&self) -> Vec<String> {
        self.health.running().await
    }

    /// Returns whether the named service is currently running.
    pub async fn is_running(&self, name: &str) -> bool {
        self.health.is_running(name).await
    }

    /// Spawns the background task that:
    /// 1. Subscribes to the event bus
    /// 2. Updates the service health ledger (sequence-based ordering)
    /// 3. Fans out events to subscribers
    fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        let health = Arc::clone(&self.health);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let arc_ev = Arc::new(ev);
                        health.observe(&arc_ev).await;
                        set.emit_arc(arc_ev);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    /// Spawns one actor per service spec.
    fn spawn_task_actors(
        &self,
        set: &mut JoinSet<()>,
        runtime_token: &CancellationToken,
        tasks: Vec<TaskSpec>,
    ) {
        for spec in tasks {
            let actor = TaskActor::new(
                self.bus.clone(),
                spec.task().clone(),
                TaskActorParams {
                    restart: spec.restart(),
                    backoff: spec.backoff(),
                    timeout: spec.timeout(),
                },
            );
            let child = runtime_token.child_token();
            set.spawn(async move {
                actor.run(child).await;
            });
        }
    }

    /// Waits for natural completion, fatal service death, or a shutdown signal.
    async fn drive_shutdown(
        &self,
        set: &mut JoinSet<()>,
        runtime_token: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        let mut fatal_rx = self.bus.subscribe();
        let fatal = async {
            loop {
                match fatal_rx.recv().await {
                    Ok(ev) if ev.kind == EventKind::ActorDead => {
                        return (
                            ev.task.unwrap_or_else(|| "unknown".into()),
                            ev.error.unwrap_or_default(),
                        );
                    }
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                }
            }
        };

        tokio::select! {
            signal = shutdown::wait_for_shutdown_signal() => {
                let mut ev = Event::now(EventKind::ShutdownRequested);
                if let Ok(name) = signal {
                    ev = ev.with_error(name);
                }
                self.bus.publish(ev);
                runtime_token.cancel();
                self.wait_all_with_grace(set).await
            }
            (name, reason) = fatal => {
                runtime_token.cancel();
                let _ = self.wait_all_with_grace(set).await;
                Err(RuntimeError::ServiceDead { name, reason })
            }
            _ = async { while set.join_next().await.is_some() {} } => {
                Ok(())
            }
        }
    }

    /// Waits for all actors with the grace period timeout.
    ///
    /// Publishes the terminal event (`AllStoppedWithin` or `GraceExceeded`).
    async fn wait_all_with_grace(&self, set: &mut JoinSet<()>) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let done = async { while set.join_next().await.is_some() {} };
        let timed = timeout(grace, done).await;

        match timed {
            Ok(_) => {
                self.bus.publish(Event::now(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                self.bus.publish(Event::now(EventKind::GraceExceeded));
                let stuck = self.running().await;
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}
