//! # Slave-mode bootstrap.
//!
//! Wires one slave together: builds the registry from the configuration,
//! binds the intake listeners *before* the first announcement (so the host
//! descriptor advertises the final port and socket path), and hands the six
//! long-lived services to the supervision runtime:
//!
//! | service | restart | job |
//! |---|---|---|
//! | `announce` | on failure | periodic presence broadcast |
//! | `discover` | on failure | presence receiver |
//! | `expire` | on failure | peer table sweeper |
//! | `intake-tcp` | on failure | remote job submissions |
//! | `intake-uds` | on failure | local job submissions (unix only) |
//! | `slave` | never | the engine-driving state machine |
//!
//! The slave service is the only one whose death ends the process; the
//! resulting non-zero exit is the supervisor's cue to respawn.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::PeerConfig;
use crate::engine::ProcessEngine;
use crate::error::RuntimeError;
use crate::intake::{tcp_task, IntakeLimits};
use crate::policies::{BackoffPolicy, JitterPolicy};
use crate::presence::{discover_task, expire_task, Announcer};
use crate::proto::{HostDescriptor, Status};
use crate::registry::{AccessLists, Registry};
use crate::runtime::{Runtime, RuntimeConfig};
use crate::slave::{SlaveLoop, SlaveSettings};
use crate::subscribers::{Subscribe, TraceWriter};
use crate::tasks::TaskSpec;

/// Period of the presence broadcast.
const ANNOUNCE_EVERY: Duration = Duration::from_secs(1);

/// Period of the peer table sweep.
const SWEEP_EVERY: Duration = Duration::from_secs(1);

/// Peers unseen for this long are evicted.
const PEER_EXPIRY: Duration = Duration::from_secs(60);

/// Hold period after an engine start failure.
const ZOMBIE_HOLD: Duration = Duration::from_secs(900);

/// Restart backoff shared by the recoverable services.
fn service_backoff() -> BackoffPolicy {
    BackoffPolicy {
        first: Duration::from_millis(500),
        max: Duration::from_secs(30),
        factor: 2.0,
        jitter: JitterPolicy::Decorrelated,
    }
}

fn boot(context: &str, source: std::io::Error) -> RuntimeError {
    RuntimeError::Bootstrap {
        context: context.to_string(),
        source,
    }
}

/// Runs one slave until shutdown or fatal engine abort.
pub async fn run_slave(config: PeerConfig, id: u32) -> Result<(), RuntimeError> {
    let user = config.effective_user();
    let host = HostDescriptor {
        id,
        name: config.effective_hostname(),
        user: user.clone(),
        group: config.effective_group(),
        memavail: config.memavail.unwrap_or(u64::MAX),
        cpuavail: config.cpuavail.unwrap_or(u64::MAX),
        timavail: config.timavail.unwrap_or(u64::MAX),
        status: Status::Idle,
        ..HostDescriptor::default()
    };
    let access = AccessLists {
        allowuser: config.allowuser.clone(),
        allowhost: config.allowhost.clone(),
        allowgroup: config.allowgroup.clone(),
    };

    let registry = Arc::new(Registry::new(host, access));
    registry
        .configure_smart(
            // An explicit memavail pins the advertisement.
            config.smartmem && config.memavail.is_none(),
            config.smartcpu,
            config.smartshare,
        )
        .await;

    // Bind intake before announcing anything.
    let tcp = TcpListener::bind(("0.0.0.0", 0))
        .await
        .map_err(|e| boot("tcp bind", e))?;
    let port = tcp.local_addr().map_err(|e| boot("tcp addr", e))?.port();

    #[cfg(unix)]
    let (uds, socket_path) = {
        let path = std::env::temp_dir().join(format!("peervisor-{user}.{id}.sock"));
        let listener = crate::intake::bind_uds(&path).map_err(|e| boot("uds bind", e))?;
        (Arc::new(listener), path.to_string_lossy().into_owned())
    };
    #[cfg(not(unix))]
    let socket_path = String::new();

    registry
        .update_host(|h| {
            h.port = port;
            h.socket = socket_path.clone();
        })
        .await;

    let targets = vec![SocketAddr::new(config.announce_addr, config.announce_port)];
    let announcer = Arc::new(
        Announcer::bind(Arc::clone(&registry), targets)
            .await
            .map_err(|e| boot("announce bind", e))?,
    );

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(TraceWriter)];
    let runtime = Runtime::new(RuntimeConfig::default(), subscribers);
    let bus = runtime.bus();

    let limits = IntakeLimits {
        max_blob: config.maxblob,
    };
    let settings = SlaveSettings {
        engine_cmd: config.matlab.clone(),
        engine_idle: Duration::from_secs(config.timeout),
        zombie_hold: ZOMBIE_HOLD,
        ..SlaveSettings::default()
    };

    info!(id, port, socket = %socket_path, "slave starting");

    let slave = SlaveLoop::new(
        Arc::clone(&registry),
        Arc::clone(&announcer),
        Arc::new(ProcessEngine),
        bus.clone(),
        settings,
    );

    let mut specs = vec![
        TaskSpec::service(announcer.into_task(ANNOUNCE_EVERY), service_backoff()),
        TaskSpec::service(
            discover_task(Arc::clone(&registry), bus.clone(), config.announce_port),
            service_backoff(),
        ),
        TaskSpec::service(
            expire_task(Arc::clone(&registry), bus.clone(), SWEEP_EVERY, PEER_EXPIRY),
            service_backoff(),
        ),
        TaskSpec::service(
            tcp_task(Arc::clone(&registry), bus.clone(), Arc::new(tcp), limits),
            service_backoff(),
        ),
    ];
    #[cfg(unix)]
    specs.push(TaskSpec::service(
        crate::intake::uds_task(Arc::clone(&registry), bus.clone(), uds, limits),
        service_backoff(),
    ));
    specs.push(TaskSpec::once(slave.into_task()));

    runtime.run(specs).await
}
