//! Application-layer wire protocol: packed frames and the handshake dialogue.
//!
//! - [`wire`]: fixed-size little-endian frames ([`HostDescriptor`],
//!   [`CurrentJob`], [`JobDef`]) and protocol constants
//! - [`framing`]: handshake and exact-length frame exchange over any async
//!   stream

pub mod framing;
pub mod wire;

pub use wire::{CurrentJob, HostDescriptor, JobDef, Status, PROTOCOL_VERSION};

use thiserror::Error;

/// Errors raised while encoding, decoding or exchanging protocol frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Buffer shorter than the fixed frame size.
    #[error("short frame: expected {expected} bytes, got {got}")]
    ShortFrame { expected: usize, got: usize },

    /// Frame carried an unsupported protocol version.
    #[error("unsupported protocol version {got}")]
    BadVersion { got: u8 },

    /// Frame carried an unknown status code.
    #[error("unknown status code {0}")]
    BadStatus(u8),

    /// The remote answered a handshake with reject.
    #[error("remote rejected the exchange")]
    Rejected,

    /// A declared payload length exceeded the configured maximum.
    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Transport failure (short read, closed socket mid-frame).
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
