//! # Error types used by the peervisor runtime and its service tasks.
//!
//! This module defines the two error enums shared across the whole daemon:
//!
//! - [`RuntimeError`] errors raised by the supervision runtime itself.
//! - [`TaskError`] errors raised by individual service task executions.
//!
//! Subsystems with their own failure vocabulary (wire protocol, engine,
//! configuration) define local enums and convert into [`TaskError`] at the
//! task boundary. Both types provide `as_label` for logs and metrics;
//! [`TaskError`] additionally exposes `is_retryable()` and `is_fatal()`,
//! which drive the restart policies.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the supervision runtime.
///
/// These represent failures in the orchestration layer, not in the
/// peer-to-peer protocol work done by the service tasks.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some services remained stuck.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of service tasks that did not stop in time.
        stuck: Vec<String>,
    },

    /// A service died with a fatal error and the runtime shut everything down.
    ///
    /// For the `slave` service this is the engine-aborted path: the process
    /// exits non-zero and the parent supervisor respawns it.
    #[error("service '{name}' died: {reason}")]
    ServiceDead {
        /// Name of the dead service task.
        name: String,
        /// Error string reported by the final attempt.
        reason: String,
    },

    /// Spawning a child slave process failed; the supervisor cannot continue.
    #[error("failed to spawn child slave: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Slave bootstrap failed (socket bind, address lookup) before the
    /// services could start.
    #[error("startup failed: {context}: {source}")]
    Bootstrap {
        /// What was being set up.
        context: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::ServiceDead { .. } => "runtime_service_dead",
            RuntimeError::SpawnFailed(_) => "runtime_spawn_failed",
            RuntimeError::Bootstrap { .. } => "runtime_bootstrap_failed",
        }
    }
}

/// # Errors produced by service task execution.
///
/// These represent failures of the long-lived tasks managed by the runtime
/// (presence, intake, slave loop). Some errors are retryable (`Timeout`,
/// `Fail`), others are fatal and terminate the whole process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task execution exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Non-recoverable fatal error (should not be retried).
    ///
    /// The slave loop returns this when the engine aborted mid-job.
    #[error("fatal error (no retry): {reason}")]
    Fatal { reason: String },

    /// Task execution failed but may succeed if retried.
    ///
    /// A lost listener socket or a failed discovery bind lands here; the
    /// restart policy brings the service back with backoff.
    #[error("execution failed: {reason}")]
    Fail { reason: String },

    /// Task was canceled due to shutdown or parent cancellation.
    ///
    /// Not an error in the traditional sense; signals intentional termination.
    #[error("context canceled")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Indicates whether the error type is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Timeout { .. } | TaskError::Fail { .. })
    }

    /// Indicates whether the error is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Fatal { .. })
    }

    /// Wraps an I/O error as a retryable failure with context.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        TaskError::Fail {
            reason: format!("{context}: {err}"),
        }
    }
}

impl From<tokio::time::error::Elapsed> for TaskError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        TaskError::Fail {
            reason: e.to_string(),
        }
    }
}
