//! # Task specification for supervised execution.
//!
//! Defines [`TaskSpec`] — a configuration bundle that describes how a service
//! task should be executed under supervision (restart policy, backoff,
//! timeout).
//!
//! A spec is created explicitly with [`TaskSpec::new`] and passed to
//! [`Runtime::run`](crate::runtime::Runtime::run) for execution.

use std::time::Duration;

use crate::{
    policies::BackoffPolicy, policies::RestartPolicy, tasks::task::TaskRef,
};

/// # Specification for running a service task under supervision.
///
/// Bundles together:
/// - The task itself ([`TaskRef`])
/// - Restart policy ([`RestartPolicy`])
/// - Backoff policy ([`BackoffPolicy`])
/// - Optional per-attempt timeout
#[derive(Clone)]
pub struct TaskSpec {
    /// Reference to the task to be executed.
    task: TaskRef,
    /// Policy controlling if/when the task should be restarted.
    restart: RestartPolicy,
    /// Policy controlling delays between restarts.
    backoff: BackoffPolicy,
    /// Optional timeout for one task attempt.
    timeout: Option<Duration>,
}

impl TaskSpec {
    /// Creates a new task specification with explicit parameters.
    pub fn new(
        task: TaskRef,
        restart: RestartPolicy,
        backoff: BackoffPolicy,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            task,
            restart,
            backoff,
            timeout,
        }
    }

    /// Creates a spec for a long-lived service: restart on failure with the
    /// given backoff, no per-attempt timeout.
    pub fn service(task: TaskRef, backoff: BackoffPolicy) -> Self {
        Self::new(task, RestartPolicy::OnFailure, backoff, None)
    }

    /// Creates a spec for a task that must never be restarted.
    pub fn once(task: TaskRef) -> Self {
        Self::new(task, RestartPolicy::Never, BackoffPolicy::default(), None)
    }

    /// Returns a reference to the task.
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    /// Returns the restart policy.
    pub fn restart(&self) -> RestartPolicy {
        self.restart
    }

    /// Returns the backoff policy.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Returns the timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
