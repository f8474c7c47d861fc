//! # cotask
//!
//! **cotask** runs async task bodies as cancelable, restartable,
//! concurrency-limited *tasks* on tokio.
//!
//! A [`Task`] wraps a body closure. Every [`perform`](Task::perform) creates a
//! [`TaskInstance`] that the task's scheduler starts, queues or drops according to
//! a buffer policy. Bodies suspend on [`Yieldable`]s through their
//! [`TaskContext`]; canceling an instance resumes its pending suspension with a
//! cancellation error so the body can clean up.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Task::perform(args)                     Task::perform(args)
//!         │                                        │
//!         ▼                                        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Scheduler (one per task, or shared by a TaskGroup)               │
//! │  - active / queued sequences                                      │
//! │  - BufferPolicy: unbounded, enqueue, drop, restartable, latest    │
//! │  - TaskRecord counters and last* instances                        │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼ admit            ▼ admit            ▼ drop (cancel)
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐
//!   │ Instance │       │ Instance │       │ Instance │
//!   │  driver  │       │  driver  │       │ (never   │
//!   └────┬─────┘       └────┬─────┘       │  starts) │
//!        │ suspend(..)      │             └──────────┘
//!        ▼                  ▼
//!   Yieldables: futures, timers, child instances, combinators,
//!               wait_for_queue / wait_for_event / wait_for_property
//!
//! settle ──► finalizers (counters) ──► request_flush ──► RunLoop `actions` queue
//!        └─► Bus (evented tasks) ──► SubscriberSet ──► LogWriter / custom
//! ```
//!
//! ### Instance lifecycle
//! ```text
//! NotStarted ──► Running ──► Succeeded | Errored | Canceled
//!     │             │
//!     │             └─ cancel ──► pending suspension resumes with Canceled
//!     │                          ──► one cleanup suspension allowed ──► Canceled
//!     └─ cancel ──► Canceled (body never runs)
//! ```
//!
//! ## Features
//! | Area            | Description                                            | Key types / traits                          |
//! |-----------------|--------------------------------------------------------|---------------------------------------------|
//! | **Tasks**       | Performable bodies with buffer policies and groups.    | [`Task`], [`TaskGroup`], [`TaskState`]      |
//! | **Instances**   | Cancelable runs with state flags; awaitable.           | [`TaskInstance`], [`InstanceHandle`]        |
//! | **Suspension**  | What a body can wait on.                               | [`Yieldable`], [`yieldables`]               |
//! | **Combinators** | Cancel-propagating `all`, `race`, `hash`, settled.     | [`Combined`], [`Member`]                    |
//! | **Policies**    | Admission and retry strategies.                        | [`BufferPolicy`], [`DelayBackOff`]          |
//! | **Host**        | Liveness, run loop, event bus.                         | [`Host`], [`RunLoop`], [`CancelationToken`] |
//! | **Errors**      | Cancellation kept apart from failures.                 | [`TaskError`], [`ConfigError`]              |
//! | **Subscriber API** | Hook into lifecycle events.                         | [`Subscribe`]                               |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use cotask::{Host, HostConfig, Task, TaskContext, TaskError, yieldables};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::new(HostConfig::default());
//!
//!     let save = Task::builder("save")
//!         .drop_excess()
//!         .build(&host, |ctx: TaskContext, doc: String| async move {
//!             ctx.suspend(yieldables::timeout(Duration::from_millis(20))).await?;
//!             Ok::<_, TaskError>(doc.len())
//!         })?;
//!
//!     let first = save.perform("draft".into());
//!     let second = save.perform("again".into());
//!     assert!(second.is_dropped());
//!     assert_eq!(first.await?, 5);
//!     Ok(())
//! }
//! ```

mod combinators;
mod config;
mod error;
mod events;
mod host;
mod instance;
mod policies;
mod scheduler;
mod subscribers;
mod tasks;
pub mod yieldables;

// ---- Public re-exports ----

pub use combinators::{Combined, Member, Settled, all, all_settled, hash, race};
pub use config::HostConfig;
pub use error::{ConfigError, TaskError, did_cancel};
pub use events::{Bus, Event, EventKind};
pub use host::{CancelationSource, CancelationToken, Host, HostBuilder, RunLoop};
pub use instance::{Dispose, InstanceHandle, InstanceState, Suspend, TaskContext, TaskInstance};
pub use policies::{
    BufferMode, BufferPolicy, DelayBackOff, JitterPolicy, NoRetry, ReasonMatcher, RetryPolicy,
    Slots,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Perform, Task, TaskBuilder, TaskGroup, TaskGroupBuilder, TaskState, TaskStatus};
pub use yieldables::{Resumer, Yieldable};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
