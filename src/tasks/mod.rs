//! Supervised task primitives: the [`Task`] trait, the closure adapter
//! [`TaskFn`], and the per-task [`TaskSpec`].

mod spec;
mod task;
mod task_fn;

pub use spec::TaskSpec;
pub use task::{BoxTaskFuture, Task, TaskRef};
pub use task_fn::TaskFn;
