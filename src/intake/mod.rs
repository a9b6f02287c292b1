//! # Job intake servers.
//!
//! Two listeners run the same [`session`] state machine: one on TCP for
//! remote masters, one on a Unix-domain socket for masters on this host. The
//! listeners are bound by the bootstrap code *before* the first announcement
//! so the host descriptor can advertise the final port and socket path; the
//! service tasks only accept.
//!
//! Each accepted connection is served on its own spawned task, so a stalled
//! submitter cannot block further intake.

mod session;

pub use session::{run_session, IntakeLimits};

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::TaskError;
use crate::events::Bus;
use crate::registry::Registry;
use crate::tasks::{TaskFn, TaskRef};

/// Builds the `intake-tcp` service around an already bound listener.
pub fn tcp_task(
    registry: Arc<Registry>,
    bus: Bus,
    listener: Arc<TcpListener>,
    limits: IntakeLimits,
) -> TaskRef {
    TaskFn::arc("intake-tcp", move |ctx: CancellationToken| {
        serve_tcp(
            Arc::clone(&registry),
            bus.clone(),
            Arc::clone(&listener),
            limits,
            ctx,
        )
    })
}

async fn serve_tcp(
    registry: Arc<Registry>,
    bus: Bus,
    listener: Arc<TcpListener>,
    limits: IntakeLimits,
    ctx: CancellationToken,
) -> Result<(), TaskError> {
    debug!(addr = ?listener.local_addr().ok(), "tcp intake started");
    loop {
        let (mut stream, from) = tokio::select! {
            r = listener.accept() => r.map_err(|e| TaskError::io("tcp accept", e))?,
            _ = ctx.cancelled() => return Err(TaskError::Canceled),
        };

        let registry = Arc::clone(&registry);
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = run_session(&mut stream, &registry, &bus, limits).await {
                error!(%from, error = %e, "tcp intake session aborted");
            }
        });
    }
}

/// Builds the `intake-uds` service around an already bound listener.
#[cfg(unix)]
pub fn uds_task(
    registry: Arc<Registry>,
    bus: Bus,
    listener: Arc<UnixListener>,
    limits: IntakeLimits,
) -> TaskRef {
    TaskFn::arc("intake-uds", move |ctx: CancellationToken| {
        serve_uds(
            Arc::clone(&registry),
            bus.clone(),
            Arc::clone(&listener),
            limits,
            ctx,
        )
    })
}

#[cfg(unix)]
async fn serve_uds(
    registry: Arc<Registry>,
    bus: Bus,
    listener: Arc<UnixListener>,
    limits: IntakeLimits,
    ctx: CancellationToken,
) -> Result<(), TaskError> {
    debug!(addr = ?listener.local_addr().ok(), "uds intake started");
    loop {
        let (mut stream, _) = tokio::select! {
            r = listener.accept() => r.map_err(|e| TaskError::io("uds accept", e))?,
            _ = ctx.cancelled() => return Err(TaskError::Canceled),
        };

        let registry = Arc::clone(&registry);
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = run_session(&mut stream, &registry, &bus, limits).await {
                error!(error = %e, "uds intake session aborted");
            }
        });
    }
}

/// Binds the UDS listener, replacing a stale socket file from a previous run.
#[cfg(unix)]
pub fn bind_uds(path: &Path) -> std::io::Result<UnixListener> {
    if std::fs::metadata(path).is_ok() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::framing::{read_handshake, write_frame};
    use crate::proto::{HostDescriptor, JobDef, Status};
    use crate::registry::AccessLists;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn tcp_service_accepts_and_enqueues() {
        let registry = Arc::new(Registry::new(
            HostDescriptor {
                id: 1,
                name: "worker".into(),
                status: Status::Idle,
                memavail: u64::MAX,
                ..HostDescriptor::default()
            },
            AccessLists::default(),
        ));
        let bus = Bus::new(16);
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();

        let task = tcp_task(
            Arc::clone(&registry),
            bus,
            listener,
            IntakeLimits { max_blob: 1 << 20 },
        );
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(task.spawn(ctx.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert!(read_handshake(&mut stream).await.unwrap());
        let submitter = HostDescriptor {
            id: 42,
            name: "master".into(),
            user: "alice".into(),
            ..HostDescriptor::default()
        };
        write_frame(&mut stream, &submitter.encode()).await.unwrap();
        assert!(read_handshake(&mut stream).await.unwrap());
        let def = JobDef {
            id: 5,
            argsize: 2,
            optsize: 0,
            ..JobDef::default()
        };
        write_frame(&mut stream, &def.encode()).await.unwrap();
        assert!(read_handshake(&mut stream).await.unwrap());
        write_frame(&mut stream, &[7, 7]).await.unwrap();
        assert!(read_handshake(&mut stream).await.unwrap());
        write_frame(&mut stream, &[]).await.unwrap();
        assert!(read_handshake(&mut stream).await.unwrap());

        // Wait for the spawned session to commit.
        for _ in 0..100 {
            if registry.job_count().await > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(registry.front_job().await.unwrap().def.id, 5);

        ctx.cancel();
        let _ = handle.await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uds_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.sock");
        let first = bind_uds(&path).unwrap();
        drop(first);
        // The stale file is still on disk; rebinding must succeed.
        let _second = bind_uds(&path).unwrap();
    }
}
