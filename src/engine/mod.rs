//! # Compute engine contract.
//!
//! The worker treats the compute engine as an opaque out-of-process
//! interpreter behind a five-operation contract:
//!
//! ```text
//! open(cmd)        → session | error
//! put(name, blob)  → error?
//! eval(expr)       → error?
//! get(name)        → blob | error
//! close()          → error?
//! ```
//!
//! [`Engine`] is the opener (one engine process per slave, opened lazily);
//! [`EngineSession`] is the handle the slave loop drives. The production
//! implementation ([`ProcessEngine`]) launches the configured command as a
//! child process and speaks a line-framed protocol over its stdio; tests
//! substitute a mock satisfying the same shape.

mod process;

pub use process::{ProcessEngine, StdioSession};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the engine driver.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be started (missing binary, licensing).
    #[error("could not start engine: {0}")]
    Spawn(std::io::Error),

    /// The engine reported an error for an operation.
    #[error("engine error: {0}")]
    Refused(String),

    /// The engine's reply did not follow the driver protocol.
    #[error("engine protocol violation: {0}")]
    Protocol(String),

    /// The engine process went away mid-operation.
    #[error("engine transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens engine sessions.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Starts the engine with the configured command.
    ///
    /// A failure here sends the slave into the zombie state for the
    /// configured hold period.
    async fn open(&self, cmd: &str) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One running engine instance.
#[async_trait]
pub trait EngineSession: Send {
    /// Copies a serialized value into the engine under `name`.
    async fn put(&mut self, name: &str, blob: &[u8]) -> Result<(), EngineError>;

    /// Evaluates an expression inside the engine.
    async fn eval(&mut self, expr: &str) -> Result<(), EngineError>;

    /// Retrieves the serialized value bound to `name`.
    async fn get(&mut self, name: &str) -> Result<Vec<u8>, EngineError>;

    /// Shuts the engine down.
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
