//! Runtime event types and the broadcast bus.
//!
//! - [`Event`] / [`EventKind`]: typed lifecycle and peer-protocol events
//! - [`Bus`]: bounded broadcast channel connecting publishers to subscribers

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
