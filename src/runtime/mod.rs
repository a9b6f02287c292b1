//! Supervision runtime: orchestration and lifecycle for the fixed set of
//! peervisor services.
//!
//! ## Files & responsibilities
//! - **core.rs**: public facade [`Runtime`]; owns the Bus, SubscriberSet and
//!   ServiceHealth ledger, seeds the ledger with the service names, spawns
//!   one actor per service, drives graceful shutdown and the fatal-service
//!   exit path.
//! - **actor.rs**: per-service supervision loop (sequential attempts):
//!   applies Restart/Backoff/Timeout, executes each attempt with a child
//!   cancellation token, publishes TaskStarting/TaskStopped/TaskFailed/
//!   TimeoutHit/BackoffScheduled and the terminal ActorExhausted/ActorDead.
//! - **health.rs**: lifecycle ledger of the fixed service set, used for
//!   stuck-service reporting during shutdown and restart counting.
//! - **shutdown.rs**: cross-platform OS signal handling; reports which
//!   signal ended the process.
//!
//! ## Shutdown timeline
//! ```text
//! OS signal → Runtime publishes ShutdownRequested(signal) → cancel runtime token
//! → actors observe cancellation and exit
//! → wait_all_with_grace(): AllStoppedWithin OR GraceExceeded{grace, stuck}
//! ```

mod actor;
mod core;
mod health;
mod shutdown;

pub use self::core::{Runtime, RuntimeConfig};
pub use self::shutdown::wait_for_shutdown_signal;
