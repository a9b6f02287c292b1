//! # TaskActor: single-service supervisor.
//!
//! Supervises execution of one service [`Task`](crate::tasks::Task) with
//! policies:
//! - restarts per [`RestartPolicy`],
//! - delays per [`BackoffPolicy`],
//! - optional per-attempt timeout,
//! - cooperative cancellation via [`CancellationToken`].
//!
//! Attempt execution lives here too: each attempt derives a child token,
//! optionally wraps the service future in a timeout, and publishes exactly
//! one terminal event (`TaskStopped` for success or graceful cancellation,
//! `TaskFailed` otherwise, preceded by `TimeoutHit` when the budget ran out).
//!
//! ## Event flow
//! ```text
//! TaskStarting → [attempt] → TaskStopped (success / cancel)
//!                          → TimeoutHit → TaskFailed (timeout)
//!                          → TaskFailed (error)
//!
//! If restart scheduled:
//!   → BackoffScheduled → [sleep] → (next attempt)
//!
//! On exit:
//!   → ActorExhausted (policy forbids restart)
//!   → ActorDead (fatal error; the slave's engine-aborted path)
//!   → (no event if canceled)
//! ```
//!
//! ## Rules
//! - Attempts run **sequentially** within one actor (never parallel)
//! - The attempt counter increments on each spawn (monotonic, never resets)
//! - A timed-out attempt has its leftover future cancelled via the child
//!   token before the failure is reported

use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{
    error::TaskError,
    events::{Bus, Event, EventKind},
    policies::{BackoffPolicy, RestartPolicy},
    tasks::TaskRef,
};

/// Reason why a task actor exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorExitReason {
    /// Actor exhausted its restart policy and will not restart.
    PolicyExhausted,
    /// Actor was canceled due to shutdown.
    Cancelled,
    /// Actor died due to a fatal error that must not be retried.
    Fatal,
}

/// Configuration parameters for a task actor.
#[derive(Clone)]
pub struct TaskActorParams {
    /// When to restart the service.
    pub restart: RestartPolicy,
    /// How to compute retry delays.
    pub backoff: BackoffPolicy,
    /// Optional per-attempt timeout (`None` = no timeout).
    pub timeout: Option<Duration>,
}

/// Supervises execution of a single service with retries, backoff, and
/// event publishing.
pub struct TaskActor {
    /// Service to execute.
    pub task: TaskRef,
    /// Parameters for supervised executions.
    pub params: TaskActorParams,
    /// Internal event bus (used to publish lifecycle events).
    pub bus: Bus,
}

impl TaskActor {
    /// Creates a new task actor.
    pub fn new(bus: Bus, task: TaskRef, params: TaskActorParams) -> Self {
        Self { task, params, bus }
    }

    /// Runs the actor until completion, restart exhaustion, or cancellation.
    pub async fn run(self, runtime_token: CancellationToken) -> ActorExitReason {
        let mut prev_delay: Option<Duration> = None;
        let mut attempt: u64 = 0;

        loop {
            if runtime_token.is_cancelled() {
                return ActorExitReason::Cancelled;
            }

            attempt += 1;
            self.publish(EventKind::TaskStarting, attempt, |ev| ev);
            let res = self.attempt(&runtime_token, attempt).await;

            match res {
                Ok(()) => {
                    prev_delay = None;

                    match self.params.restart {
                        RestartPolicy::Always => {
                            continue;
                        }
                        RestartPolicy::OnFailure | RestartPolicy::Never => {
                            self.publish(EventKind::ActorExhausted, attempt, |ev| {
                                ev.with_error("policy_exhausted_success")
                            });
                            return ActorExitReason::PolicyExhausted;
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    self.publish(EventKind::ActorDead, attempt, |ev| {
                        ev.with_error(e.to_string())
                    });
                    return ActorExitReason::Fatal;
                }
                Err(TaskError::Canceled) => {
                    return ActorExitReason::Cancelled;
                }
                Err(e) => {
                    let policy_allows_retry = matches!(
                        self.params.restart,
                        RestartPolicy::OnFailure | RestartPolicy::Always
                    );

                    if !(policy_allows_retry && e.is_retryable()) {
                        self.publish(EventKind::ActorExhausted, attempt, |ev| {
                            ev.with_error(e.to_string())
                        });
                        return ActorExitReason::PolicyExhausted;
                    }

                    let delay = self.params.backoff.next(prev_delay);
                    prev_delay = Some(delay);
                    self.publish(EventKind::BackoffScheduled, attempt, |ev| {
                        ev.with_delay(delay).with_error(e.to_string())
                    });

                    let sleep = time::sleep(delay);
                    tokio::pin!(sleep);
                    select! {
                        _ = &mut sleep => {},
                        _ = runtime_token.cancelled() => {
                            return ActorExitReason::Cancelled;
                        }
                    }
                }
            }
        }
    }

    /// Runs one attempt of the service.
    ///
    /// Derives a child token (isolated cancellation per attempt), applies the
    /// optional timeout, and publishes the attempt's terminal event.
    async fn attempt(
        &self,
        parent: &CancellationToken,
        attempt: u64,
    ) -> Result<(), TaskError> {
        let child = parent.child_token();
        let work = self.task.spawn(child.clone());

        let res = match self.params.timeout.filter(|limit| !limit.is_zero()) {
            Some(limit) => match time::timeout(limit, work).await {
                Ok(res) => res,
                Err(_elapsed) => {
                    // The attempt overran its budget: cancel the leftover
                    // future, then report the hit ahead of the failure.
                    child.cancel();
                    self.publish(EventKind::TimeoutHit, attempt, |ev| ev.with_timeout(limit));
                    Err(TaskError::Timeout { timeout: limit })
                }
            },
            None => work.await,
        };

        // Exactly one terminal event per attempt; cancellation counts as a
        // graceful stop, not a failure.
        match &res {
            Ok(()) | Err(TaskError::Canceled) => {
                self.publish(EventKind::TaskStopped, attempt, |ev| ev);
            }
            Err(e) => {
                self.publish(EventKind::TaskFailed, attempt, |ev| {
                    ev.with_error(e.to_string())
                });
            }
        }
        res
    }

    /// Stamps the service name and attempt on an event, lets the caller
    /// decorate it, and publishes it.
    fn publish<F>(&self, kind: EventKind, attempt: u64, decorate: F)
    where
        F: FnOnce(Event) -> Event,
    {
        let ev = Event::now(kind)
            .with_task(self.task.name())
            .with_attempt(attempt);
        self.bus.publish(decorate(ev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;
    use crate::tasks::TaskFn;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn quick_backoff() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(5),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    #[tokio::test]
    async fn never_policy_runs_once() {
        let bus = Bus::new(32);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let task = TaskFn::arc("one-shot", move |_ctx| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>(())
            }
        });
        let actor = TaskActor::new(
            bus,
            task,
            TaskActorParams {
                restart: RestartPolicy::Never,
                backoff: quick_backoff(),
                timeout: None,
            },
        );

        let reason = actor.run(CancellationToken::new()).await;
        assert_eq!(reason, ActorExitReason::PolicyExhausted);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_failure_retries_until_success() {
        let bus = Bus::new(64);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let task = TaskFn::arc("flaky", move |_ctx| {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TaskError::Fail {
                        reason: "not yet".into(),
                    })
                } else {
                    Ok(())
                }
            }
        });
        let actor = TaskActor::new(
            bus,
            task,
            TaskActorParams {
                restart: RestartPolicy::OnFailure,
                backoff: quick_backoff(),
                timeout: None,
            },
        );

        let reason = actor.run(CancellationToken::new()).await;
        assert_eq!(reason, ActorExitReason::PolicyExhausted);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_kills_actor() {
        let bus = Bus::new(32);
        let mut rx = bus.subscribe();
        let task = TaskFn::arc("doomed", |_ctx| async {
            Err::<(), _>(TaskError::Fatal {
                reason: "engine aborted".into(),
            })
        });
        let actor = TaskActor::new(
            bus,
            task,
            TaskActorParams {
                restart: RestartPolicy::OnFailure,
                backoff: quick_backoff(),
                timeout: None,
            },
        );

        let reason = actor.run(CancellationToken::new()).await;
        assert_eq!(reason, ActorExitReason::Fatal);

        loop {
            let ev = rx.recv().await.unwrap();
            if ev.kind == EventKind::ActorDead {
                assert_eq!(ev.task.as_deref(), Some("doomed"));
                break;
            }
        }
    }

    #[tokio::test]
    async fn overrunning_attempt_is_timed_out_and_cancelled() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let task = TaskFn::arc("stuck", |ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err::<(), _>(TaskError::Canceled)
        });
        let actor = TaskActor::new(
            bus,
            task,
            TaskActorParams {
                restart: RestartPolicy::Never,
                backoff: quick_backoff(),
                timeout: Some(Duration::from_millis(20)),
            },
        );

        let reason = actor.run(CancellationToken::new()).await;
        // A timeout is retryable, but Never forbids the retry.
        assert_eq!(reason, ActorExitReason::PolicyExhausted);

        let mut saw_timeout = false;
        let mut saw_failed = false;
        while let Ok(ev) = rx.try_recv() {
            match ev.kind {
                EventKind::TimeoutHit => saw_timeout = true,
                EventKind::TaskFailed => saw_failed = true,
                _ => {}
            }
        }
        assert!(saw_timeout && saw_failed);
    }

    #[tokio::test]
    async fn failure_event_carries_the_error_message() {
        let bus = Bus::new(32);
        let mut rx = bus.subscribe();
        let task = TaskFn::arc("bad", |_ctx| async {
            Err::<(), _>(TaskError::Fail {
                reason: "socket gone".into(),
            })
        });
        let actor = TaskActor::new(
            bus,
            task,
            TaskActorParams {
                restart: RestartPolicy::Never,
                backoff: quick_backoff(),
                timeout: None,
            },
        );
        actor.run(CancellationToken::new()).await;

        loop {
            let ev = rx.recv().await.unwrap();
            if ev.kind == EventKind::TaskFailed {
                assert!(ev.error.unwrap().contains("socket gone"));
                break;
            }
        }
    }
}
