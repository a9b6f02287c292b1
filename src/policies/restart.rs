//! # Restart policies for service actors.
//!
//! [`RestartPolicy`] determines whether a service task is restarted after it
//! finishes or fails.
//!
//! - [`RestartPolicy::Never`] the task runs once and is never restarted.
//! - [`RestartPolicy::Always`] the task is restarted unconditionally.
//! - [`RestartPolicy::OnFailure`] the task is restarted only if it fails (default).
//!
//! The presence and intake services use `OnFailure`: a lost socket is retried
//! with backoff. The slave loop uses `Never`: its exit is either cancellation
//! or a fatal engine abort that must take the process down.

/// Policy controlling whether a task is restarted after completion or failure.
#[derive(Clone, Copy, Debug, Default)]
pub enum RestartPolicy {
    /// Never restart: the task runs once and exits permanently.
    Never,
    /// Always restart: the task restarts unconditionally after it finishes or fails.
    Always,
    /// Restart only on failure (default).
    #[default]
    OnFailure,
}
