//! # peervisor
//!
//! **Peervisor** is a LAN peer-to-peer distributed-computing worker: a
//! long-lived daemon that announces itself over UDP broadcast, discovers
//! sibling peers, accepts framed job submissions over TCP and Unix-domain
//! sockets, drives an external compute engine one job at a time, and mails
//! serialized results back to the submitting master. A parent supervisor
//! keeps the configured number of slaves running, respawning crashed
//! children with fresh host ids.
//!
//! ## Subsystems
//!
//! | Area            | Description                                                       | Key types / traits                       |
//! |-----------------|-------------------------------------------------------------------|------------------------------------------|
//! | **Registry**    | Shared host/peer/job state, one lock per aggregate.               | [`Registry`], [`PeerEntry`], [`JobEntry`] |
//! | **Presence**    | Announce / discover / expire over broadcast datagrams.            | [`presence::Announcer`]                  |
//! | **Intake**      | Handshake-interleaved job transfer over TCP and UDS.              | [`intake::run_session`]                  |
//! | **Slave loop**  | The idle/busy/zombie state machine driving the engine.            | [`slave::SlaveLoop`]                     |
//! | **Engine**      | Five-operation out-of-process interpreter contract.               | [`engine::Engine`], [`engine::EngineSession`] |
//! | **Supervisor**  | Restart-on-exit manager for child slave processes.                | [`Supervisor`]                           |
//! | **Runtime**     | In-process supervision of the six services.                       | [`Runtime`], [`tasks::TaskSpec`]         |
//! | **Events**      | Typed lifecycle events fanned out to subscribers.                 | [`events::Event`], [`subscribers::Subscribe`] |
//!
//! ## Data flow
//!
//! ```text
//! master ──TCP/UDS──► intake ──► job queue ──► slave loop ──► engine
//!                                                   │
//! master ◄──TCP/UDS── result-send ◄─────────────────┘
//! ```
//!
//! Control flow: `announce`/`discover` maintain the peer table the slave
//! loop consults when mailing results back.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod events;
pub mod intake;
pub mod logging;
pub mod payload;
pub mod policies;
pub mod presence;
pub mod proto;
pub mod registry;
pub mod runtime;
pub mod slave;
pub mod subscribers;
mod supervisor;
pub mod tasks;

// ---- Public re-exports ----

pub use config::PeerConfig;
pub use error::{RuntimeError, TaskError};
pub use proto::{CurrentJob, HostDescriptor, JobDef, Status};
pub use registry::{AccessLists, JobEntry, PeerEntry, Registry};
pub use runtime::{Runtime, RuntimeConfig};
pub use supervisor::{ChildSpawner, Supervisor};
