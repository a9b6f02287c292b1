//! # Slave loop: the core state machine.
//!
//! Single-threaded driver of the compute engine. One iteration at a time it
//! moves the host through its three states:
//!
//! ```text
//!           job queued, engine starts          result sent
//!   IDLE ──────────────────────────► BUSY ──────────────────► IDLE
//!     │                                                         ▲
//!     │ engine start fails                     zombie hold over │
//!     └──────────────────────────► ZOMBIE ─────────────────────┘
//!
//!   any state ── engine aborts mid-job ──► process exit (supervisor respawns)
//! ```
//!
//! ## Rules
//! - At most one job executes at a time; the queue is drained one entry per
//!   iteration and cleared after the result send.
//! - Every status transition is announced *after* the host lock is released.
//! - The engine is opened lazily on the first job and closed again after
//!   [`SlaveSettings::engine_idle`] without work.
//! - An engine failure during eval or result retrieval aborts the process;
//!   put failures and start failures only fail the job, which is answered
//!   with a synthesized `("lasterr", <message>)` result.

mod deliver;

pub use deliver::{deliver, send_result};

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineSession};
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::payload;
use crate::presence::Announcer;
use crate::proto::{CurrentJob, JobDef, Status};
use crate::registry::{JobEntry, Registry};
use crate::tasks::{TaskFn, TaskRef};

/// The fixed expression evaluated for every job; `peerexec` implements the
/// in-engine watchdog driven by the injected `timallow` option.
const EVAL_EXPR: &str = "[argout, options] = peerexec(argin, options);";

/// Synthesized error message when the engine cannot be started.
const ENGINE_START_ERR: &str = "could not start the matlab engine";

/// Timing knobs of the state machine.
#[derive(Debug, Clone)]
pub struct SlaveSettings {
    /// Command handed to [`Engine::open`].
    pub engine_cmd: String,
    /// Close the engine after this long without a job.
    pub engine_idle: std::time::Duration,
    /// Stay zombie for this long after an engine start failure.
    pub zombie_hold: std::time::Duration,
    /// Sleep between queue polls while idle.
    pub poll: std::time::Duration,
}

impl Default for SlaveSettings {
    /// Engine idle 180s, zombie hold 900s, 10ms poll.
    fn default() -> Self {
        Self {
            engine_cmd: "matlab -nosplash".into(),
            engine_idle: std::time::Duration::from_secs(180),
            zombie_hold: std::time::Duration::from_secs(900),
            poll: std::time::Duration::from_millis(10),
        }
    }
}

/// Which step of the engine exchange failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFailure {
    Argin,
    Optin,
    Eval,
    Argout,
    Optout,
}

impl StepFailure {
    /// The message reported back to the master.
    fn message(self) -> &'static str {
        match self {
            StepFailure::Argin => "failed to execute the job (argin)",
            StepFailure::Optin => "failed to execute the job (optin)",
            StepFailure::Eval => "failed to execute the job (eval)",
            StepFailure::Argout => "failed to execute the job (argout)",
            StepFailure::Optout => "failed to execute the job (optout)",
        }
    }

    /// Eval and retrieval failures leave the engine in an unknown state; the
    /// process must die so the supervisor can respawn a clean slave.
    fn aborts(self) -> bool {
        matches!(self, StepFailure::Eval | StepFailure::Argout | StepFailure::Optout)
    }
}

/// The `slave` service.
pub struct SlaveLoop {
    registry: Arc<Registry>,
    announcer: Arc<Announcer>,
    engine: Arc<dyn Engine>,
    bus: Bus,
    settings: SlaveSettings,
}

impl SlaveLoop {
    pub fn new(
        registry: Arc<Registry>,
        announcer: Arc<Announcer>,
        engine: Arc<dyn Engine>,
        bus: Bus,
        settings: SlaveSettings,
    ) -> Self {
        Self {
            registry,
            announcer,
            engine,
            bus,
            settings,
        }
    }

    /// Wraps the loop into the `slave` service task.
    ///
    /// The spec for this task must use `RestartPolicy::Never`: a fatal return
    /// is the engine-aborted exit and has to surface as a process death.
    pub fn into_task(self) -> TaskRef {
        let me = Arc::new(self);
        TaskFn::arc("slave", move |ctx: CancellationToken| {
            let me = Arc::clone(&me);
            async move { me.run(ctx).await }
        })
    }

    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
        let mut session: Option<Box<dyn EngineSession>> = None;
        let mut failed_at: Option<Instant> = None;
        let mut finished_at = Instant::now();
        let mut jobs_done: u64 = 0;

        // Start as an idle slave and tell the network.
        self.set_status(Status::Idle, CurrentJob::default()).await;

        loop {
            if ctx.is_cancelled() {
                if let Some(s) = session.take() {
                    let _ = s.close().await;
                }
                return Err(TaskError::Canceled);
            }

            // Switch the engine off after being idle for long enough.
            if session.is_some() && finished_at.elapsed() > self.settings.engine_idle {
                let s = session.take().expect("checked is_some");
                match s.close().await {
                    Ok(()) => info!("stopped idle engine"),
                    Err(e) => warn!(error = %e, "could not stop idle engine"),
                }
                self.bus.publish(Event::now(EventKind::EngineStopped));
            }

            // Switch from zombie back to idle after the hold expires.
            if let Some(t) = failed_at {
                if t.elapsed() > self.settings.zombie_hold {
                    info!("switching back to idle mode");
                    self.set_status(Status::Idle, CurrentJob::default()).await;
                    failed_at = None;
                    continue;
                }
            }

            if self.registry.job_count().await == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll) => {}
                    _ = ctx.cancelled() => continue,
                }
                continue;
            }

            // There is a job to be executed; make sure the engine runs.
            let mut engine_failed = false;
            if session.is_none() {
                info!("starting engine");
                match self.engine.open(&self.settings.engine_cmd).await {
                    Ok(s) => {
                        session = Some(s);
                        self.bus.publish(Event::now(EventKind::EngineStarted));
                    }
                    Err(e) => {
                        // Probably licensing; refuse work for the hold period.
                        error!(error = %e, "could not start engine, switching to zombie");
                        self.bus.publish(
                            Event::now(EventKind::EngineFailed).with_error(e.to_string()),
                        );
                        failed_at = Some(Instant::now());
                        engine_failed = true;
                        self.set_status(Status::Zombie, CurrentJob::default()).await;
                    }
                }
            }

            let Some(job) = self.registry.front_job().await else {
                continue;
            };
            let peer_identity = job.host.identity();
            let jobid = job.def.id;
            let masterid = job.host.id;

            let mut aborted = false;
            let (argout, options) = if engine_failed {
                error!(peer = %peer_identity, job = jobid, "failed to execute job (engine)");
                (
                    payload::empty_argout(),
                    payload::lasterr_options(ENGINE_START_ERR),
                )
            } else {
                let host = self.go_busy(&job).await;
                jobs_done += 1;

                // Maximum allowed duration: three times the request, capped
                // by our own advertisement.
                let timallow = job.def.timreq.saturating_mul(3).min(host.timavail);
                info!(
                    peer = %peer_identity,
                    job = jobid,
                    num = jobs_done,
                    memreq = job.def.memreq,
                    timreq = job.def.timreq,
                    "executing job"
                );
                self.bus.publish(
                    Event::now(EventKind::JobStarted)
                        .with_peer(&peer_identity)
                        .with_job(u64::from(jobid)),
                );

                let started = Instant::now();
                let engine = session.as_mut().expect("engine running");
                match execute(engine.as_mut(), &job, masterid, timallow).await {
                    Ok((argout, options)) => {
                        debug!(job = jobid, secs = started.elapsed().as_secs(), "job evaluated");
                        (argout, options)
                    }
                    Err(step) => {
                        error!(peer = %peer_identity, job = jobid, "{}", step.message());
                        aborted = step.aborts();
                        (
                            payload::empty_argout(),
                            payload::lasterr_options(step.message()),
                        )
                    }
                }
            };

            // Mail the results back to the master.
            match self.registry.find_peer(masterid).await {
                None => {
                    error!(master = masterid, job = jobid, "failed to locate specified peer");
                    self.bus.publish(
                        Event::now(EventKind::DeliveryFailed)
                            .with_peer(&peer_identity)
                            .with_job(u64::from(jobid))
                            .with_error("peer not found"),
                    );
                }
                Some(peer) => {
                    let me = self.registry.snapshot_host().await;
                    let def = JobDef {
                        id: jobid,
                        memreq: 0,
                        cpureq: 0,
                        timreq: 0,
                        argsize: argout.len() as u32,
                        optsize: options.len() as u32,
                    };
                    if let Err(e) = deliver(&peer, &me, &def, &argout, &options).await {
                        error!(peer = %peer_identity, job = jobid, error = %e, "result delivery failed");
                        self.bus.publish(
                            Event::now(EventKind::DeliveryFailed)
                                .with_peer(&peer_identity)
                                .with_job(u64::from(jobid))
                                .with_error(e.to_string()),
                        );
                    }
                }
            }

            self.registry.clear_jobs().await;

            if !engine_failed {
                // Spread the idle announce when smartshare is on, so waiting
                // masters don't all pick this slave at once.
                let share = self.registry.share_delay().await;
                if share > std::time::Duration::ZERO {
                    tokio::time::sleep(share).await;
                }
                self.set_status(Status::Idle, CurrentJob::default()).await;
                finished_at = Instant::now();
                self.bus.publish(
                    Event::now(EventKind::JobFinished)
                        .with_peer(&peer_identity)
                        .with_job(u64::from(jobid)),
                );
            }

            if aborted {
                return Err(TaskError::Fatal {
                    reason: "engine aborted during evaluation".into(),
                });
            }
        }
    }

    /// Applies a status transition and publishes it, announce after unlock.
    async fn set_status(&self, status: Status, current: CurrentJob) {
        self.registry
            .update_host(|h| {
                h.status = status;
                h.current = current;
            })
            .await;
        self.announcer.announce_once().await;
        self.bus
            .publish(Event::now(EventKind::StatusChanged).with_error(status.as_label()));
    }

    /// Marks the host busy with the given job and returns the snapshot.
    async fn go_busy(&self, job: &JobEntry) -> crate::proto::HostDescriptor {
        let current = CurrentJob {
            hostid: job.host.id,
            jobid: job.def.id,
            name: job.host.name.clone(),
            user: job.host.user.clone(),
            group: job.host.group.clone(),
            memreq: job.def.memreq,
            cpureq: job.def.cpureq,
            timreq: job.def.timreq,
        };
        let snapshot = self
            .registry
            .update_host(|h| {
                h.status = Status::Busy;
                h.current = current;
            })
            .await;
        self.announcer.announce_once().await;
        self.bus
            .publish(Event::now(EventKind::StatusChanged).with_error(Status::Busy.as_label()));
        snapshot
    }
}

/// Runs one job through the engine.
///
/// The options container gains the `masterid` and `timallow` cells before it
/// is copied in; the evaluator's watchdog reads them back out.
async fn execute(
    engine: &mut dyn EngineSession,
    job: &JobEntry,
    masterid: u32,
    timallow: u64,
) -> Result<(Vec<u8>, Vec<u8>), StepFailure> {
    let options = payload::inject_watchdog(&job.opt, masterid, timallow)
        .map_err(|_| StepFailure::Optin)?;

    engine
        .put("argin", &job.arg)
        .await
        .map_err(|_| StepFailure::Argin)?;
    engine
        .put("options", &options)
        .await
        .map_err(|_| StepFailure::Optin)?;
    engine.eval(EVAL_EXPR).await.map_err(|_| StepFailure::Eval)?;
    let argout = engine.get("argout").await.map_err(|_| StepFailure::Argout)?;
    let options = engine
        .get("options")
        .await
        .map_err(|_| StepFailure::Optout)?;
    Ok((argout, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::payload::{decode_cells, Cell};
    use crate::proto::framing::{read_frame, write_handshake};
    use crate::proto::HostDescriptor;
    use crate::registry::AccessLists;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Scripted engine: records puts, answers gets from a map.
    struct MockEngine {
        fail_open: bool,
        fail_eval: bool,
        puts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        outputs: HashMap<String, Vec<u8>>,
    }

    struct MockSession {
        fail_eval: bool,
        puts: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        outputs: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl Engine for MockEngine {
        async fn open(&self, _cmd: &str) -> Result<Box<dyn EngineSession>, EngineError> {
            if self.fail_open {
                return Err(EngineError::Spawn(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no license",
                )));
            }
            Ok(Box::new(MockSession {
                fail_eval: self.fail_eval,
                puts: Arc::clone(&self.puts),
                outputs: self.outputs.clone(),
            }))
        }
    }

    #[async_trait]
    impl EngineSession for MockSession {
        async fn put(&mut self, name: &str, blob: &[u8]) -> Result<(), EngineError> {
            self.puts.lock().unwrap().insert(name.into(), blob.to_vec());
            Ok(())
        }
        async fn eval(&mut self, _expr: &str) -> Result<(), EngineError> {
            if self.fail_eval {
                Err(EngineError::Refused("undefined function peerexec".into()))
            } else {
                Ok(())
            }
        }
        async fn get(&mut self, name: &str) -> Result<Vec<u8>, EngineError> {
            self.outputs
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::Refused(format!("no such variable {name}")))
        }
        async fn close(self: Box<Self>) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct Received {
        host: HostDescriptor,
        def: JobDef,
        argout: Vec<u8>,
        options: Vec<u8>,
    }

    /// A master waiting for exactly one result over TCP.
    async fn result_server() -> (u16, tokio::task::JoinHandle<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            write_handshake(&mut s, true).await.unwrap();
            let host = read_frame(&mut s, HostDescriptor::WIRE_LEN, HostDescriptor::WIRE_LEN)
                .await
                .unwrap();
            let host = HostDescriptor::decode(&host).unwrap();
            write_handshake(&mut s, true).await.unwrap();
            let def = read_frame(&mut s, JobDef::WIRE_LEN, JobDef::WIRE_LEN).await.unwrap();
            let def = JobDef::decode(&def).unwrap();
            write_handshake(&mut s, true).await.unwrap();
            let argout = read_frame(&mut s, def.argsize as usize, 1 << 20).await.unwrap();
            write_handshake(&mut s, true).await.unwrap();
            let options = read_frame(&mut s, def.optsize as usize, 1 << 20).await.unwrap();
            write_handshake(&mut s, true).await.unwrap();
            Received {
                host,
                def,
                argout,
                options,
            }
        });
        (port, handle)
    }

    struct Harness {
        registry: Arc<Registry>,
        bus: Bus,
        ctx: CancellationToken,
        handle: tokio::task::JoinHandle<Result<(), TaskError>>,
        /// Keeps the announce sink socket alive for the test's duration.
        _sink: tokio::net::UdpSocket,
    }

    async fn start_slave(engine: MockEngine, settings: SlaveSettings) -> Harness {
        let registry = Arc::new(Registry::new(
            HostDescriptor {
                id: 1,
                name: "worker".into(),
                user: "worker".into(),
                memavail: u64::MAX,
                cpuavail: u64::MAX,
                timavail: 100,
                ..HostDescriptor::default()
            },
            AccessLists::default(),
        ));
        registry.configure_smart(true, true, false).await;

        // Announcements go to a throwaway local receiver.
        let sink = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = sink.local_addr().unwrap();
        let announcer = Arc::new(
            Announcer::bind(Arc::clone(&registry), vec![target])
                .await
                .unwrap(),
        );

        let bus = Bus::new(256);
        let slave = SlaveLoop::new(
            Arc::clone(&registry),
            announcer,
            Arc::new(engine),
            bus.clone(),
            settings,
        );
        let task = slave.into_task();
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(task.spawn(ctx.clone()));
        Harness {
            registry,
            bus,
            ctx,
            handle,
            _sink: sink,
        }
    }

    fn quick_settings() -> SlaveSettings {
        SlaveSettings {
            engine_cmd: "mock".into(),
            engine_idle: Duration::from_secs(60),
            zombie_hold: Duration::from_secs(60),
            poll: Duration::from_millis(5),
        }
    }

    async fn submit_job(h: &Harness, masterid: u32, port: u16, arg: Vec<u8>, opt: Vec<u8>) {
        let master = HostDescriptor {
            id: masterid,
            name: "master".into(),
            user: "alice".into(),
            port,
            ..HostDescriptor::default()
        };
        h.registry
            .upsert_peer(master.clone(), IpAddr::from([127, 0, 0, 1]))
            .await;
        let def = JobDef {
            id: 7,
            argsize: arg.len() as u32,
            optsize: opt.len() as u32,
            timreq: 10,
            ..JobDef::default()
        };
        h.registry
            .enqueue_job(JobEntry::new(master, def, arg, opt).unwrap())
            .await;
    }

    #[tokio::test]
    async fn happy_path_delivers_engine_output_and_returns_idle() {
        let puts = Arc::new(Mutex::new(HashMap::new()));
        let engine = MockEngine {
            fail_open: false,
            fail_eval: false,
            puts: Arc::clone(&puts),
            outputs: HashMap::from([
                ("argout".to_string(), vec![0xaa, 0xbb]),
                ("options".to_string(), vec![0xcc]),
            ]),
        };
        let h = start_slave(engine, quick_settings()).await;
        let (port, server) = result_server().await;

        submit_job(&h, 42, port, vec![1, 2, 3, 4], payload::encode_cells(&[])).await;

        let received = server.await.unwrap();
        assert_eq!(received.def.id, 7);
        assert_eq!(received.def.memreq, 0);
        assert_eq!(received.argout, vec![0xaa, 0xbb]);
        assert_eq!(received.options, vec![0xcc]);
        assert_eq!(received.host.name, "worker");

        // Injected watchdog options sit at positions n..n+3.
        let opts = puts.lock().unwrap().get("options").unwrap().clone();
        let cells = decode_cells(&opts).unwrap();
        assert_eq!(cells[0], Cell::Text("masterid".into()));
        assert_eq!(cells[1], Cell::Number(42));
        assert_eq!(cells[2], Cell::Text("timallow".into()));
        assert_eq!(cells[3], Cell::Number(30)); // min(3*10, timavail=100)

        // Back to idle, queue cleared.
        for _ in 0..100 {
            if h.registry.snapshot_host().await.status == Status::Idle
                && h.registry.job_count().await == 0
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.registry.snapshot_host().await.status, Status::Idle);
        assert_eq!(h.registry.job_count().await, 0);

        h.ctx.cancel();
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn engine_start_failure_goes_zombie_and_reports_lasterr() {
        let engine = MockEngine {
            fail_open: true,
            fail_eval: false,
            puts: Arc::new(Mutex::new(HashMap::new())),
            outputs: HashMap::new(),
        };
        let h = start_slave(engine, quick_settings()).await;
        let (port, server) = result_server().await;

        submit_job(&h, 42, port, vec![1], payload::encode_cells(&[])).await;

        let received = server.await.unwrap();
        let cells = decode_cells(&received.options).unwrap();
        assert_eq!(cells[0], Cell::Text("lasterr".into()));
        assert_eq!(
            cells[1],
            Cell::Text("could not start the matlab engine".into())
        );

        // Stays zombie while the hold lasts.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.registry.snapshot_host().await.status, Status::Zombie);
        assert_eq!(h.registry.job_count().await, 0);

        h.ctx.cancel();
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn zombie_recovers_after_the_hold() {
        let engine = MockEngine {
            fail_open: true,
            fail_eval: false,
            puts: Arc::new(Mutex::new(HashMap::new())),
            outputs: HashMap::new(),
        };
        let mut settings = quick_settings();
        settings.zombie_hold = Duration::from_millis(50);
        let h = start_slave(engine, settings).await;
        let (port, server) = result_server().await;

        submit_job(&h, 42, port, vec![1], payload::encode_cells(&[])).await;
        let _ = server.await.unwrap();

        for _ in 0..100 {
            if h.registry.snapshot_host().await.status == Status::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.registry.snapshot_host().await.status, Status::Idle);

        h.ctx.cancel();
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn missing_peer_drops_result_and_returns_idle() {
        let engine = MockEngine {
            fail_open: false,
            fail_eval: false,
            puts: Arc::new(Mutex::new(HashMap::new())),
            outputs: HashMap::from([
                ("argout".to_string(), vec![1]),
                ("options".to_string(), vec![2]),
            ]),
        };
        let h = start_slave(engine, quick_settings()).await;
        let mut rx = h.bus.subscribe();

        // Enqueue without registering the master in the peer table.
        let master = HostDescriptor {
            id: 99,
            name: "ghost".into(),
            user: "alice".into(),
            port: 1,
            ..HostDescriptor::default()
        };
        let def = JobDef {
            id: 3,
            argsize: 1,
            optsize: payload::encode_cells(&[]).len() as u32,
            ..JobDef::default()
        };
        h.registry
            .enqueue_job(JobEntry::new(master, def, vec![0], payload::encode_cells(&[])).unwrap())
            .await;

        loop {
            let ev = rx.recv().await.unwrap();
            if ev.kind == EventKind::DeliveryFailed {
                assert_eq!(ev.error.as_deref(), Some("peer not found"));
                break;
            }
        }

        for _ in 0..100 {
            if h.registry.snapshot_host().await.status == Status::Idle
                && h.registry.job_count().await == 0
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.registry.job_count().await, 0);
        assert_eq!(h.registry.snapshot_host().await.status, Status::Idle);

        h.ctx.cancel();
        let _ = h.handle.await;
    }

    #[tokio::test]
    async fn eval_failure_sends_lasterr_then_aborts_the_process() {
        let engine = MockEngine {
            fail_open: false,
            fail_eval: true,
            puts: Arc::new(Mutex::new(HashMap::new())),
            outputs: HashMap::new(),
        };
        let h = start_slave(engine, quick_settings()).await;
        let (port, server) = result_server().await;

        submit_job(&h, 42, port, vec![1], payload::encode_cells(&[])).await;

        let received = server.await.unwrap();
        let cells = decode_cells(&received.options).unwrap();
        assert_eq!(cells[1], Cell::Text("failed to execute the job (eval)".into()));

        // The slave task dies fatally; the runtime turns this into exit 1.
        let result = h.handle.await.unwrap();
        assert!(matches!(result, Err(TaskError::Fatal { .. })));
    }
}
