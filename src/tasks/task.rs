//! # Task abstraction for supervised execution.
//!
//! Defines the core [`Task`] trait for async, cancelable units of work.
//!
//! - **[`Task`]** — trait for implementing async tasks with cancellation support
//! - **[`TaskRef`]** — shared handle (`Arc<dyn Task>`) for passing tasks across the runtime
//! - **[`BoxTaskFuture`]** — type alias for boxed task futures
//!
//! ## Rules
//! - The crate provides [`TaskFn`](crate::tasks::TaskFn) — a function-backed
//!   implementation that wraps closures as tasks.
//! - Tasks receive a [`CancellationToken`] and **must** check `is_cancelled()`
//!   periodically to enable graceful shutdown.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future returned by [`Task::spawn`].
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a task object.
pub type TaskRef = Arc<dyn Task>;

/// Asynchronous, cancelable unit of work.
///
/// Every long-lived peervisor service (announce, discover, expire, the two
/// intake listeners, the slave loop) implements this shape and is then
/// supervised by the runtime.
///
/// ## Rules
/// - **Stateless spawning**: `spawn(&self)` is `Fn`, not `FnMut` — no shared
///   mutable state between spawns
/// - **Fresh futures**: each `spawn()` call creates a new independent future
/// - **Cancellation**: implementations must check `ctx.is_cancelled()`
///   periodically
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name.
    ///
    /// Used for logging and stuck task detection during shutdown.
    fn name(&self) -> &str;

    /// Creates a new future that runs the task until completion or cancellation.
    ///
    /// ### Cancellation requirements
    /// The returned future must check `ctx.is_cancelled()` periodically and
    /// exit promptly; failure to do so prevents graceful shutdown.
    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture;
}
