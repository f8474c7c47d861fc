//! # Tasks and task groups.
//!
//! - [`Task`] - a performable body bound to a host and a scheduler
//! - [`TaskBuilder`] - buffer policy, concurrency limit, group, retry, events
//! - [`TaskGroup`] / [`TaskGroupBuilder`] - a scheduler shared by several tasks
//! - [`TaskState`] / [`TaskStatus`] - derived running/queued/idle state

mod builder;
mod group;
mod state;
mod task;

pub use builder::{TaskBuilder, TaskGroupBuilder};
pub use group::TaskGroup;
pub use state::{TaskState, TaskStatus};
pub use task::{Perform, Task};
