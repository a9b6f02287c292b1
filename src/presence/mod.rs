//! Presence protocol: periodic announce, discovery receiver, expiry sweeper.
//!
//! Three cooperating services keep the peer table alive:
//! - [`Announcer`]: broadcasts this host's descriptor (periodically and after
//!   every status change)
//! - [`discover_task`]: receives announcements and upserts peers
//! - [`expire_task`]: evicts peers whose announcements stopped

mod announce;
mod discover;
mod expire;

pub use announce::{Announcer, LARGE_TABLE};
pub use discover::discover_task;
pub use expire::expire_task;
