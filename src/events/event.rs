//! # Runtime events emitted by the supervision runtime and the peer services.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Service lifecycle**: task execution flow (starting, stopped, failed, timeout)
//! - **Actor terminal states**: exhausted policy, dead
//! - **Peer protocol**: jobs accepted/rejected/started/finished, peers expired,
//!   engine and status transitions
//! - **Shutdown**: signal received, grace window outcome
//!
//! The [`Event`] struct carries optional metadata: timestamps, service name,
//! error message, retry delay, the peer a job came from, and the job id.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered correctly even when delivered
//! out-of-order through async channels.
//!
//! ## Example
//! ```rust
//! use peervisor::events::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::JobRejected)
//!     .with_peer("alice@node7")
//!     .with_job(42)
//!     .with_error("user not allowed");
//!
//! assert_eq!(ev.kind, EventKind::JobRejected);
//! assert_eq!(ev.peer.as_deref(), Some("alice@node7"));
//! assert_eq!(ev.job, Some(42));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal received).
    ShutdownRequested,
    /// All services stopped within the configured grace period.
    AllStoppedWithin,
    /// Grace period exceeded; some services did not stop in time.
    GraceExceeded,

    // === Service lifecycle events ===
    /// Service task is starting execution.
    TaskStarting,
    /// Service task has stopped (finished or cancelled).
    TaskStopped,
    /// Service task failed with an error.
    TaskFailed,
    /// Service task hit its configured timeout.
    TimeoutHit,
    /// Service task is scheduled to back off before restarting.
    BackoffScheduled,

    // === Actor terminal states ===
    /// Actor exhausted its restart policy and will not restart.
    ActorExhausted,
    /// Actor terminated permanently due to a fatal error.
    ///
    /// For the `slave` service this is the engine-aborted exit; the runtime
    /// reacts by shutting the whole process down.
    ActorDead,

    // === Peer protocol events ===
    /// The host status changed (idle/busy/zombie) and was announced.
    StatusChanged,
    /// A previously unknown peer appeared in the peer table.
    PeerDiscovered,
    /// A peer was evicted because its announcements stopped.
    PeerExpired,
    /// Intake accepted a job and appended it to the queue.
    JobQueued,
    /// Intake refused a submission (access policy, busy, bad frame).
    JobRejected,
    /// The slave loop picked a job and went busy.
    JobStarted,
    /// The slave loop finished a job (including job-level failures).
    JobFinished,
    /// The result could not be delivered to the submitter.
    DeliveryFailed,
    /// The compute engine was started.
    EngineStarted,
    /// The compute engine was stopped (idle close or shutdown).
    EngineStopped,
    /// The compute engine could not be started; the slave went zombie.
    EngineFailed,
}

/// Runtime event with optional metadata.
///
/// Carries information about service lifecycle, retries, errors, backoff
/// delays, and the peer/job a protocol event refers to.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// Task timeout (if relevant).
    pub timeout: Option<Duration>,
    /// Backoff delay before retry (if relevant).
    pub delay: Option<Duration>,
    /// Error message, or a short detail for informational events (the new
    /// status name on `StatusChanged`, the signal name on
    /// `ShutdownRequested`).
    pub error: Option<String>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u64>,
    /// Name of the service task, if applicable.
    pub task: Option<String>,
    /// `user@name` of the peer a protocol event refers to.
    pub peer: Option<String>,
    /// Job id a protocol event refers to.
    pub job: Option<u64>,
    /// The kind of event.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            at: SystemTime::now(),
            attempt: None,
            timeout: None,
            error: None,
            delay: None,
            task: None,
            peer: None,
            job: None,
        }
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a service task name.
    pub fn with_task(mut self, name: impl Into<String>) -> Self {
        self.task = Some(name.into());
        self
    }

    /// Attaches a timeout duration.
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches an attempt count.
    pub fn with_attempt(mut self, n: u64) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches the peer (`user@name`) a protocol event refers to.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Attaches the job id a protocol event refers to.
    pub fn with_job(mut self, id: u64) -> Self {
        self.job = Some(id);
        self
    }

    /// Returns true for the subscriber-diagnostic kinds.
    ///
    /// Used by the fan-out set to avoid publishing overflow diagnostics about
    /// overflow diagnostics.
    pub fn is_subscriber_diagnostic(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_error(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_error(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::TaskStarting);
        let b = Event::now(EventKind::TaskStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::JobQueued)
            .with_task("intake-tcp")
            .with_peer("alice@node7")
            .with_job(7)
            .with_attempt(2);
        assert_eq!(ev.task.as_deref(), Some("intake-tcp"));
        assert_eq!(ev.peer.as_deref(), Some("alice@node7"));
        assert_eq!(ev.job, Some(7));
        assert_eq!(ev.attempt, Some(2));
    }

    #[test]
    fn diagnostic_kinds_are_flagged() {
        assert!(Event::subscriber_overflow("log", "full").is_subscriber_diagnostic());
        assert!(Event::subscriber_panicked("log", "boom".into()).is_subscriber_diagnostic());
        assert!(!Event::now(EventKind::JobQueued).is_subscriber_diagnostic());
    }
}
