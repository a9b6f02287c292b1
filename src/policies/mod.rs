//! Execution policies for supervised service tasks.
//!
//! - [`RestartPolicy`]: whether a finished/failed service comes back
//! - [`BackoffPolicy`]: how restart delays grow
//! - [`JitterPolicy`]: how delays are randomized (also used by the announce
//!   spreading and the smartshare switch)

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
