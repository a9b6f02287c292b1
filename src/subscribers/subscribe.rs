//! # Event subscriber trait.
//!
//! Provides [`Subscribe`] — the extension point for plugging custom event
//! handlers into the runtime.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Bounded queue** (configurable capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics caught, reported as `SubscriberPanicked`)
//!
//! ## Rules
//! - Slow subscribers only affect themselves (queue overflow → event drop)
//! - Panics are isolated and do not crash the runtime or other subscribers
//! - Subscribers do not block publishers or each other

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// Receives events from the runtime via a dedicated worker task with a
/// bounded queue.
///
/// ### Rules
/// - `on_event()` runs in a dedicated worker (not in publisher context)
/// - Queue overflow drops events for this subscriber only
/// - Panics are caught and isolated (runtime continues)
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Events are processed sequentially (FIFO order) per subscriber.
    /// Handle errors internally; do not panic.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for logging and diagnostics.
    ///
    /// Used in `SubscriberOverflow` and `SubscriberPanicked` events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
