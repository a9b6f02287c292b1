//! # The intake state machine.
//!
//! One accepted connection runs the five-stage transfer dialogue, identical
//! over TCP and UDS:
//!
//! ```text
//! server → handshake 1                 (willing to receive)
//! server ← HostDescriptor             access policy + idle check → handshake
//! server ← JobDef                     version + size validation → handshake
//! server ← arg bytes (argsize)        → handshake
//! server ← opt bytes (optsize)        → handshake
//! server: enqueue JobEntry, close
//! ```
//!
//! Any short read, failed handshake or policy denial terminates the
//! connection and discards partial state; a job appears in the queue iff all
//! four acks were positive and all bytes were read. The session never touches
//! the engine.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::events::{Bus, Event, EventKind};
use crate::proto::framing::{read_frame, write_handshake};
use crate::proto::{HostDescriptor, JobDef, ProtoError, Status};
use crate::registry::{JobEntry, Registry};

/// Size validation knobs for incoming payloads.
#[derive(Debug, Clone, Copy)]
pub struct IntakeLimits {
    /// Hard cap for either payload blob.
    pub max_blob: u64,
}

/// Runs one intake session over an accepted stream.
///
/// Returns `Ok(true)` when a job was enqueued, `Ok(false)` on a policy
/// rejection (clean close), and `Err` on transport failures.
pub async fn run_session<S>(
    stream: &mut S,
    registry: &Registry,
    bus: &Bus,
    limits: IntakeLimits,
) -> Result<bool, ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Stage 0: we are willing to receive.
    write_handshake(stream, true).await?;

    // Stage 1: submitter descriptor.
    let frame = read_frame(stream, HostDescriptor::WIRE_LEN, HostDescriptor::WIRE_LEN).await?;
    let submitter = match HostDescriptor::decode(&frame) {
        Ok(submitter) => submitter,
        Err(e) => {
            write_handshake(stream, false).await?;
            bus.publish(Event::now(EventKind::JobRejected).with_error(e.to_string()));
            return Ok(false);
        }
    };

    if let Err(deny) = registry.admit(&submitter).await {
        write_handshake(stream, false).await?;
        bus.publish(
            Event::now(EventKind::JobRejected)
                .with_peer(submitter.identity())
                .with_error(deny.as_label()),
        );
        return Ok(false);
    }

    let me = registry.snapshot_host().await;
    if me.status != Status::Idle {
        write_handshake(stream, false).await?;
        bus.publish(
            Event::now(EventKind::JobRejected)
                .with_peer(submitter.identity())
                .with_error(format!("slave is {}", me.status.as_label())),
        );
        return Ok(false);
    }
    write_handshake(stream, true).await?;

    // Stage 2: job definition.
    let frame = read_frame(stream, JobDef::WIRE_LEN, JobDef::WIRE_LEN).await?;
    let def = match JobDef::decode(&frame) {
        Ok(def) => def,
        Err(e) => {
            write_handshake(stream, false).await?;
            bus.publish(
                Event::now(EventKind::JobRejected)
                    .with_peer(submitter.identity())
                    .with_error(e.to_string()),
            );
            return Ok(false);
        }
    };

    let total = u64::from(def.argsize) + u64::from(def.optsize);
    if u64::from(def.argsize) > limits.max_blob
        || u64::from(def.optsize) > limits.max_blob
        || total > me.memavail
    {
        write_handshake(stream, false).await?;
        bus.publish(
            Event::now(EventKind::JobRejected)
                .with_peer(submitter.identity())
                .with_job(u64::from(def.id))
                .with_error("payload exceeds limits"),
        );
        return Ok(false);
    }
    write_handshake(stream, true).await?;

    // Stages 3 and 4: the payload blobs, exactly as declared.
    let arg = read_frame(stream, def.argsize as usize, limits.max_blob as usize).await?;
    write_handshake(stream, true).await?;
    let opt = read_frame(stream, def.optsize as usize, limits.max_blob as usize).await?;
    write_handshake(stream, true).await?;

    // Stage 5: commit.
    let identity = submitter.identity();
    let id = def.id;
    let job = JobEntry::new(submitter, def, arg, opt)
        .expect("frame reads are exactly the declared sizes");
    registry.enqueue_job(job).await;
    debug!(peer = %identity, job = id, "job enqueued");
    bus.publish(
        Event::now(EventKind::JobQueued)
            .with_peer(identity)
            .with_job(u64::from(id)),
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::framing::{read_handshake, write_frame};
    use crate::registry::AccessLists;
    use std::sync::Arc;

    const LIMITS: IntakeLimits = IntakeLimits {
        max_blob: 1 << 20,
    };

    fn idle_registry(access: AccessLists) -> Arc<Registry> {
        Arc::new(Registry::new(
            HostDescriptor {
                id: 1,
                name: "worker".into(),
                status: Status::Idle,
                memavail: 1 << 20,
                ..HostDescriptor::default()
            },
            access,
        ))
    }

    fn submitter() -> HostDescriptor {
        HostDescriptor {
            id: 42,
            name: "master".into(),
            user: "alice".into(),
            group: "lab".into(),
            port: 9000,
            ..HostDescriptor::default()
        }
    }

    #[tokio::test]
    async fn happy_path_enqueues_exactly_the_sent_bytes() {
        let registry = idle_registry(AccessLists::default());
        let bus = Bus::new(16);
        let (mut client, mut server) = tokio::io::duplex(4096);

        let reg = Arc::clone(&registry);
        let bus2 = bus.clone();
        let session =
            tokio::spawn(
                async move { run_session(&mut server, &reg, &bus2, LIMITS).await },
            );

        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &submitter().encode()).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());

        let def = JobDef {
            id: 7,
            argsize: 8,
            optsize: 4,
            timreq: 10,
            ..JobDef::default()
        };
        write_frame(&mut client, &def.encode()).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &[9, 9, 9, 9]).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());

        assert!(session.await.unwrap().unwrap());
        let job = registry.front_job().await.unwrap();
        assert_eq!(job.def.id, 7);
        assert_eq!(job.arg, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(job.opt, vec![9, 9, 9, 9]);
        assert_eq!(job.host.id, 42);
    }

    #[tokio::test]
    async fn access_denial_closes_after_descriptor() {
        let registry = idle_registry(AccessLists {
            allowuser: vec!["bob".into()],
            ..AccessLists::default()
        });
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let (mut client, mut server) = tokio::io::duplex(4096);

        let reg = Arc::clone(&registry);
        let bus2 = bus.clone();
        let session =
            tokio::spawn(
                async move { run_session(&mut server, &reg, &bus2, LIMITS).await },
            );

        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &submitter().encode()).await.unwrap();
        // Denial arrives as handshake 0.
        assert!(!read_handshake(&mut client).await.unwrap());

        assert!(!session.await.unwrap().unwrap());
        assert_eq!(registry.job_count().await, 0);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::JobRejected);
        assert_eq!(ev.error.as_deref(), Some("user not allowed"));
    }

    #[tokio::test]
    async fn busy_slave_refuses_submissions() {
        let registry = idle_registry(AccessLists::default());
        registry.update_host(|h| h.status = Status::Busy).await;
        let bus = Bus::new(16);
        let (mut client, mut server) = tokio::io::duplex(4096);

        let reg = Arc::clone(&registry);
        let bus2 = bus.clone();
        let session =
            tokio::spawn(
                async move { run_session(&mut server, &reg, &bus2, LIMITS).await },
            );

        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &submitter().encode()).await.unwrap();
        assert!(!read_handshake(&mut client).await.unwrap());
        assert!(!session.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn jobdef_version_mismatch_is_rejected() {
        let registry = idle_registry(AccessLists::default());
        let bus = Bus::new(16);
        let (mut client, mut server) = tokio::io::duplex(4096);

        let reg = Arc::clone(&registry);
        let bus2 = bus.clone();
        let session =
            tokio::spawn(
                async move { run_session(&mut server, &reg, &bus2, LIMITS).await },
            );

        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &submitter().encode()).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());

        let mut frame = JobDef::default().encode();
        frame[0] = 99;
        write_frame(&mut client, &frame).await.unwrap();
        assert!(!read_handshake(&mut client).await.unwrap());

        assert!(!session.await.unwrap().unwrap());
        assert_eq!(registry.job_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let registry = idle_registry(AccessLists::default());
        let bus = Bus::new(16);
        let (mut client, mut server) = tokio::io::duplex(4096);

        let reg = Arc::clone(&registry);
        let bus2 = bus.clone();
        let session =
            tokio::spawn(
                async move { run_session(&mut server, &reg, &bus2, LIMITS).await },
            );

        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &submitter().encode()).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());

        // memavail is 1 MiB; declare more than fits.
        let def = JobDef {
            id: 8,
            argsize: 1 << 20,
            optsize: 1 << 20,
            ..JobDef::default()
        };
        write_frame(&mut client, &def.encode()).await.unwrap();
        assert!(!read_handshake(&mut client).await.unwrap());
        assert!(!session.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn short_read_discards_partial_state() {
        let registry = idle_registry(AccessLists::default());
        let bus = Bus::new(16);
        let (mut client, mut server) = tokio::io::duplex(4096);

        let reg = Arc::clone(&registry);
        let bus2 = bus.clone();
        let session =
            tokio::spawn(
                async move { run_session(&mut server, &reg, &bus2, LIMITS).await },
            );

        assert!(read_handshake(&mut client).await.unwrap());
        write_frame(&mut client, &submitter().encode()).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());

        let def = JobDef {
            id: 9,
            argsize: 64,
            optsize: 0,
            ..JobDef::default()
        };
        write_frame(&mut client, &def.encode()).await.unwrap();
        assert!(read_handshake(&mut client).await.unwrap());

        // Send half the declared bytes, then hang up.
        write_frame(&mut client, &[0u8; 32]).await.unwrap();
        drop(client);

        assert!(session.await.unwrap().is_err());
        assert_eq!(registry.job_count().await, 0);
    }
}
