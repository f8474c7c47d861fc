//! # Task: a performable body with a scheduler.
//!
//! Every [`perform`](Task::perform) creates a [`TaskInstance`] and hands it to the
//! task's scheduler (or its group's), which starts, queues or drops it according to
//! the buffer policy.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use cotask::{yieldables, Host, HostConfig, Task, TaskContext, TaskError, TaskState};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::new(HostConfig::default());
//!     let search = Task::builder("search")
//!         .restartable()
//!         .build(&host, |ctx: TaskContext, query: String| async move {
//!             ctx.suspend(yieldables::timeout(Duration::from_millis(50))).await?;
//!             Ok::<_, TaskError>(query.len())
//!         })?;
//!
//!     let first = search.perform("ru".into());
//!     let second = search.perform("rust".into());
//!     assert!(first.clone().await.is_err());
//!     assert_eq!(second.await?, 4);
//!     assert!(search.is_idle());
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::host::Host;
use crate::host::core::HOST_DESTROYED;
use crate::instance::core::{BoxBody, InstanceCore};
use crate::instance::{InstanceHandle, TaskContext, TaskInstance, erase};
use crate::policies::RetryPolicy;
use crate::scheduler::{LastKind, Scheduler, TaskRecord};
use crate::tasks::{TaskBuilder, TaskState};
use crate::error::TaskError;

type BodyFn<A> = Arc<dyn Fn(TaskContext, A) -> BoxBody + Send + Sync>;

/// A task taking arguments `A` and producing `T`.
///
/// Cheap to clone; clones share the scheduler, counters and `last*` fields.
pub struct Task<A, T> {
    record: Arc<TaskRecord>,
    body: BodyFn<A>,
    scheduler: Arc<Scheduler>,
    host: Host,
    retry: Arc<dyn RetryPolicy>,
    evented: bool,
    _value: PhantomData<fn() -> T>,
}

impl<A, T> Clone for Task<A, T> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            body: Arc::clone(&self.body),
            scheduler: Arc::clone(&self.scheduler),
            host: self.host.clone(),
            retry: Arc::clone(&self.retry),
            evented: self.evented,
            _value: PhantomData,
        }
    }
}

impl<A, T> fmt::Debug for Task<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", self.record.name())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Task<(), ()> {
    /// Creates a builder for a task called `name`.
    pub fn builder(name: impl Into<Arc<str>>) -> TaskBuilder {
        TaskBuilder::new(name)
    }
}

impl<A, T> Task<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_parts<F, Fut>(
        record: Arc<TaskRecord>,
        scheduler: Arc<Scheduler>,
        host: Host,
        retry: Arc<dyn RetryPolicy>,
        evented: bool,
        f: F,
    ) -> Self
    where
        F: Fn(TaskContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Self {
            record,
            body: Arc::new(move |ctx, args| erase(f(ctx, args))),
            scheduler,
            host,
            retry,
            evented,
            _value: PhantomData,
        }
    }

    /// Creates an instance and schedules it.
    ///
    /// On a destroyed host the instance is canceled right away.
    pub fn perform(&self, args: A) -> TaskInstance<T> {
        self.perform_with(args, None, false)
    }

    /// Performs with the resulting instance linked to the instance running `ctx`:
    /// canceling that instance cancels this one too.
    pub fn linked<'a>(&'a self, ctx: &TaskContext) -> Perform<'a, A, T> {
        Perform {
            task: self,
            parent: Some(Arc::clone(ctx.core())),
            unlinked: false,
        }
    }

    /// Performs an instance that is not canceled when the instance yielding it is.
    pub fn unlinked(&self) -> Perform<'_, A, T> {
        Perform {
            task: self,
            parent: None,
            unlinked: true,
        }
    }

    fn perform_with(&self, args: A, parent: Option<Arc<InstanceCore>>, unlinked: bool) -> TaskInstance<T> {
        let core = InstanceCore::new(
            Arc::clone(self.record.name()),
            Arc::clone(&self.retry),
            self.evented.then(|| self.host.bus().clone()),
            unlinked,
            self.host.cancelation_source().token(),
        );
        let ctx = TaskContext::new(Arc::clone(&core), Some(self.host.clone()));
        core.install((self.body)(ctx, args));

        if let Some(parent) = parent {
            parent.link_child(&core);
        }
        if self.host.is_destroyed() {
            core.cancel(Arc::from(HOST_DESTROYED));
        }

        self.scheduler
            .schedule(InstanceHandle::from_core(Arc::clone(&core)), Arc::clone(&self.record));
        TaskInstance::from_core(core)
    }

    /// A task with arguments `B` mapped onto this task's `A`.
    ///
    /// The curried task shares the scheduler, counters and `last*` fields.
    pub fn curry<B, F>(&self, map: F) -> Task<B, T>
    where
        B: Send + 'static,
        F: Fn(B) -> A + Send + Sync + 'static,
    {
        let body = Arc::clone(&self.body);
        Task {
            record: Arc::clone(&self.record),
            body: Arc::new(move |ctx, args| body(ctx, map(args))),
            scheduler: Arc::clone(&self.scheduler),
            host: self.host.clone(),
            retry: Arc::clone(&self.retry),
            evented: self.evented,
            _value: PhantomData,
        }
    }
}

impl<A, T> Task<A, T> {
    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Cancels every running and queued instance of this task.
    ///
    /// In a group, only this task's instances are affected. Returns how many were
    /// canceled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let own = Arc::as_ptr(&self.record);
        self.scheduler
            .cancel_all(reason, &|owner| std::ptr::eq(owner, own))
    }

    /// Number of `perform` calls so far.
    pub fn perform_count(&self) -> u64 {
        self.record.perform_count()
    }

    /// Effective concurrency limit; `None` is unbounded.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.scheduler.max_concurrency()
    }

    /// Name of the buffer policy in effect (the group's for group members).
    pub fn policy_name(&self) -> &'static str {
        self.scheduler.policy_name()
    }

    fn last(&self, kind: LastKind) -> Option<TaskInstance<T>> {
        self.record
            .last_instance(kind)
            .map(|h| TaskInstance::from_core(Arc::clone(h.core())))
    }

    pub fn last_performed(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Performed)
    }

    pub fn last_started(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Started)
    }

    /// The most recently started instance, while it is still running.
    pub fn last_running(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Running)
    }

    /// The most recently finished started instance, whatever the outcome.
    pub fn last_complete(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Complete)
    }

    pub fn last_successful(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Successful)
    }

    pub fn last_errored(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Errored)
    }

    pub fn last_canceled(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Canceled)
    }

    /// The most recently errored or canceled instance.
    pub fn last_incomplete(&self) -> Option<TaskInstance<T>> {
        self.last(LastKind::Incomplete)
    }
}

impl<A, T> TaskState for Task<A, T> {
    fn num_running(&self) -> usize {
        self.record.num_running()
    }

    fn num_queued(&self) -> usize {
        self.record.num_queued()
    }
}

/// Perform variant returned by [`Task::linked`] and [`Task::unlinked`].
pub struct Perform<'a, A, T> {
    task: &'a Task<A, T>,
    parent: Option<Arc<InstanceCore>>,
    unlinked: bool,
}

impl<A, T> Perform<'_, A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn perform(self, args: A) -> TaskInstance<T> {
        self.task.perform_with(args, self.parent, self.unlinked)
    }
}
