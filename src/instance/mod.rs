//! Task instances: one cancelable run of a task body.
//!
//! ## Contents
//! - [`TaskInstance`] typed handle returned by `perform`; awaitable
//! - [`InstanceHandle`] type-erased handle with the state flags and `cancel`
//! - [`TaskContext`] handed to the body; suspends on [`Yieldable`](crate::Yieldable)s
//! - [`InstanceState`] lifecycle state
//!
//! ## Lifecycle
//! ```text
//! perform ──► NotStarted ──(scheduler admits)──► Running ──► Succeeded | Errored | Canceled
//!                 │                                 │
//!                 └──────── cancel() ───────────────┴──► unwind step ──► Canceled
//! ```
//!
//! A body suspends by awaiting `ctx.suspend(..)`. Cancellation resolves the pending
//! suspension with [`TaskError::Canceled`](crate::TaskError::Canceled) so the body can
//! run its cleanup; the body may suspend once more while unwinding, a second
//! suspension drops it.

mod context;
pub(crate) mod core;
mod driver;
mod handle;

pub use self::core::{Dispose, InstanceState};
pub use context::{Suspend, TaskContext};
pub use handle::{InstanceHandle, TaskInstance};
pub(crate) use handle::erase;

pub(crate) const LINKED_PARENT_CANCELED: &str = "the linked parent task instance was canceled";
pub(crate) const YIELDER_CANCELED: &str = "the task instance that yielded it was canceled";
pub(crate) const GATE_FAILED: &str = "the future it was waiting on before starting failed";
