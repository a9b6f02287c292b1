//! # Tracing-backed logging subscriber.
//!
//! [`TraceWriter`] renders runtime events as structured `tracing` records so
//! the `verbose` filter (see [`crate::logging`]) decides what reaches the
//! operator.
//!
//! Level mapping follows the severity the original daemon logged each
//! situation at: routine lifecycle is DEBUG, protocol milestones are INFO,
//! denials and retries are WARN, losses and deaths are ERROR.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Structured logging subscriber.
///
/// Stateless; safe to register alongside custom subscribers.
pub struct TraceWriter;

#[async_trait]
impl Subscribe for TraceWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskStarting => {
                debug!(task, attempt = e.attempt, "service starting");
            }
            EventKind::TaskStopped => {
                debug!(task, "service stopped");
            }
            EventKind::TaskFailed => {
                warn!(task, error = e.error.as_deref(), "service failed");
            }
            EventKind::TimeoutHit => {
                warn!(task, timeout = ?e.timeout, "service attempt timed out");
            }
            EventKind::BackoffScheduled => {
                warn!(task, delay = ?e.delay, error = e.error.as_deref(), "service restart scheduled");
            }
            EventKind::ActorExhausted => {
                info!(task, "service will not be restarted");
            }
            EventKind::ActorDead => {
                error!(task, error = e.error.as_deref(), "service died");
            }
            EventKind::ShutdownRequested => {
                info!(signal = e.error.as_deref(), "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!("all services stopped within grace");
            }
            EventKind::GraceExceeded => {
                error!("grace period exceeded");
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = task, error = e.error.as_deref(), "subscriber panicked");
            }
            EventKind::SubscriberOverflow => {
                warn!(error = e.error.as_deref(), "subscriber queue overflow");
            }
            EventKind::StatusChanged => {
                info!(status = e.error.as_deref(), "status changed");
            }
            EventKind::PeerDiscovered => {
                info!(peer = e.peer.as_deref(), "peer discovered");
            }
            EventKind::PeerExpired => {
                info!(peer = e.peer.as_deref(), "peer expired");
            }
            EventKind::JobQueued => {
                info!(peer = e.peer.as_deref(), job = e.job, "job queued");
            }
            EventKind::JobRejected => {
                warn!(peer = e.peer.as_deref(), reason = e.error.as_deref(), "job rejected");
            }
            EventKind::JobStarted => {
                info!(peer = e.peer.as_deref(), job = e.job, "job started");
            }
            EventKind::JobFinished => {
                info!(peer = e.peer.as_deref(), job = e.job, error = e.error.as_deref(), "job finished");
            }
            EventKind::DeliveryFailed => {
                error!(peer = e.peer.as_deref(), job = e.job, error = e.error.as_deref(), "result delivery failed");
            }
            EventKind::EngineStarted => {
                info!("engine started");
            }
            EventKind::EngineStopped => {
                info!("engine stopped");
            }
            EventKind::EngineFailed => {
                error!(error = e.error.as_deref(), "engine failed to start");
            }
        }
    }

    fn name(&self) -> &'static str {
        "trace-writer"
    }
}
