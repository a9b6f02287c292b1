//! # Queued jobs.
//!
//! A [`JobEntry`] pairs the submitter's descriptor with the job metadata and
//! the two opaque payload blobs. Entries are ordered FIFO by arrival and
//! consumed one at a time by the slave loop.

use thiserror::Error;

use crate::proto::{HostDescriptor, JobDef};

/// A payload blob length did not match its declared size.
///
/// Intake never constructs such an entry; the constructor enforces the
/// invariant `len(arg) == argsize && len(opt) == optsize`.
#[derive(Debug, Error)]
#[error("{what} blob is {got} bytes, declared {declared}")]
pub struct SizeMismatch {
    pub what: &'static str,
    pub got: usize,
    pub declared: u32,
}

/// A queued job: submitter, metadata, and the two payload blobs.
#[derive(Debug, Clone)]
pub struct JobEntry {
    /// Submitting master's descriptor as received during intake.
    pub host: HostDescriptor,
    /// Job metadata.
    pub def: JobDef,
    /// Serialized input arguments; opaque.
    pub arg: Vec<u8>,
    /// Serialized options container.
    pub opt: Vec<u8>,
}

impl JobEntry {
    /// Builds an entry, enforcing that blob lengths equal the declared sizes.
    pub fn new(
        host: HostDescriptor,
        def: JobDef,
        arg: Vec<u8>,
        opt: Vec<u8>,
    ) -> Result<Self, SizeMismatch> {
        if arg.len() != def.argsize as usize {
            return Err(SizeMismatch {
                what: "arg",
                got: arg.len(),
                declared: def.argsize,
            });
        }
        if opt.len() != def.optsize as usize {
            return Err(SizeMismatch {
                what: "opt",
                got: opt.len(),
                declared: def.optsize,
            });
        }
        Ok(Self { host, def, arg, opt })
    }
}
