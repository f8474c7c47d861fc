//! # Instance handles.
//!
//! [`InstanceHandle`] is the type-erased view used by schedulers, policies and
//! combinators; [`TaskInstance<T>`] adds the typed value and completion API and
//! derefs to the handle for the state flags.
//!
//! ## Example
//! ```rust
//! use cotask::{TaskError, TaskInstance};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), TaskError> {
//!     let inst = TaskInstance::create(|_ctx| async { Ok::<_, TaskError>(21 * 2) });
//!     inst.start();
//!     assert_eq!(inst.clone().await?, 42);
//!     assert!(inst.is_successful());
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::TaskError;
use crate::host::CancelationToken;
use crate::instance::core::{ErasedValue, InstanceCore, InstanceState};
use crate::instance::{TaskContext, YIELDER_CANCELED};
use crate::policies::NoRetry;
use crate::yieldables::{Dispose, Resumer, Yieldable};

/// Type-erased handle to a task instance.
///
/// Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct InstanceHandle {
    core: Arc<InstanceCore>,
}

impl InstanceHandle {
    pub(crate) fn from_core(core: Arc<InstanceCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<InstanceCore> {
        &self.core
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceCore> {
        Arc::downgrade(&self.core)
    }

    /// Process-unique instance id.
    pub fn id(&self) -> u64 {
        self.core.id()
    }

    /// Name of the task that performed this instance.
    pub fn task_name(&self) -> &str {
        self.core.task_name()
    }

    pub fn state(&self) -> InstanceState {
        self.core.state()
    }

    /// True once a scheduler admitted the instance (or `start` was called).
    pub fn has_started(&self) -> bool {
        self.core.has_started()
    }

    pub fn is_running(&self) -> bool {
        self.state() == InstanceState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    pub fn is_successful(&self) -> bool {
        self.state() == InstanceState::Succeeded
    }

    pub fn is_error(&self) -> bool {
        self.state() == InstanceState::Errored
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == InstanceState::Canceled
    }

    /// Canceled before it ever started (dropped by a buffer policy or `cancel_all`).
    pub fn is_dropped(&self) -> bool {
        self.is_canceled() && !self.has_started()
    }

    /// True from `cancel` until the instance settles.
    pub fn is_cancel_requested(&self) -> bool {
        self.core.cancel_requested()
    }

    /// Number of retries scheduled so far.
    pub fn retry_count(&self) -> u32 {
        self.core.retry_count()
    }

    /// True while a retry timer is pending.
    pub fn is_retrying(&self) -> bool {
        self.core.is_retrying()
    }

    /// Error of an errored or canceled instance.
    pub fn error(&self) -> Option<TaskError> {
        self.core.error()
    }

    /// Cancelation token canceled together with this instance.
    pub fn token(&self) -> CancelationToken {
        self.core.token().clone()
    }

    /// Requests cancellation.
    ///
    /// Idempotent; a no-op once the instance settled. An instance that never ran
    /// settles as canceled immediately; a running one is unwound at its pending
    /// suspension.
    pub fn cancel(&self, reason: impl Into<Arc<str>>) {
        self.core.cancel(reason.into());
    }

    /// Schedules the pending suspension to be re-armed after `delay`.
    ///
    /// Increments [`retry_count`](Self::retry_count) and sets
    /// [`is_retrying`](Self::is_retrying). Intended for [`RetryPolicy`](crate::RetryPolicy)
    /// implementations.
    pub fn retry_after(&self, delay: Duration) {
        self.core.retry_after(delay);
    }

    /// Cancels a pending retry timer and clears `is_retrying`.
    pub fn clear_retry(&self) {
        self.core.clear_retry();
    }

    /// Waits until the instance settles, whatever the outcome.
    pub async fn finished(&self) {
        self.core.settled().await;
    }
}

impl PartialEq for InstanceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for InstanceHandle {}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id())
            .field("task", &self.task_name())
            .field("state", &self.state())
            .finish()
    }
}

/// Typed handle to one run of a task body.
///
/// Awaiting a `TaskInstance` yields its settled outcome; cancellation surfaces as
/// [`TaskError::Canceled`].
pub struct TaskInstance<T> {
    handle: InstanceHandle,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for TaskInstance<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> Deref for TaskInstance<T> {
    type Target = InstanceHandle;

    fn deref(&self) -> &InstanceHandle {
        &self.handle
    }
}

impl<T> fmt::Debug for TaskInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.handle.fmt(f)
    }
}

impl<T> TaskInstance<T> {
    pub(crate) fn from_core(core: Arc<InstanceCore>) -> Self {
        Self {
            handle: InstanceHandle::from_core(core),
            _value: PhantomData,
        }
    }

    /// The erased handle.
    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }
}

impl<T> TaskInstance<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a standalone, not-yet-started instance outside of any task.
    ///
    /// The body runs once [`start`](Self::start) is called. Standalone instances
    /// have no scheduler, no retry policy and no host.
    pub fn create<F, Fut>(body: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let core = InstanceCore::new(
            Arc::from("anonymous"),
            Arc::new(NoRetry),
            None,
            false,
            CancelationToken::new(),
        );
        let fut = body(TaskContext::new(Arc::clone(&core), None));
        core.install(erase(fut));
        Self::from_core(core)
    }

    /// Starts the body. No-op if already started or canceled.
    pub fn start(&self) -> &Self {
        if self.handle.core.admit() {
            self.handle.core.launch();
        }
        self
    }

    /// Starts the body once `gate` resolves; a failing gate cancels the instance.
    ///
    /// Canceling before the gate resolves settles the instance without running
    /// any body code.
    pub fn start_after<G>(&self, gate: G) -> &Self
    where
        G: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.handle.core.set_gate(gate.boxed());
        self.start()
    }

    /// Settled value of a successful instance.
    pub fn value(&self) -> Option<T> {
        match self.handle.core.outcome() {
            Some(Ok(value)) => value.downcast_ref::<T>().cloned(),
            _ => None,
        }
    }

    /// Settled outcome, `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, TaskError>> {
        self.handle.core.outcome().map(|res| res.and_then(downcast::<T>))
    }

    /// Waits for the instance to settle and returns its outcome.
    pub async fn completion(&self) -> Result<T, TaskError> {
        self.handle.core.settled().await;
        match self.outcome() {
            Some(res) => res,
            None => Err(TaskError::msg("instance completion observed before settle")),
        }
    }

    /// Maps the successful value once settled.
    pub fn then<U, F>(self, f: F) -> impl Future<Output = Result<U, TaskError>> + Send
    where
        F: FnOnce(T) -> U + Send + 'static,
    {
        async move { self.completion().await.map(f) }
    }

    /// Recovers from an error (including cancellation) once settled.
    pub fn catch<F>(self, f: F) -> impl Future<Output = T> + Send
    where
        F: FnOnce(TaskError) -> T + Send + 'static,
    {
        async move { self.completion().await.unwrap_or_else(f) }
    }

    /// Runs `f` once settled, whatever the outcome, and passes the outcome through.
    pub fn finally<F>(self, f: F) -> impl Future<Output = Result<T, TaskError>> + Send
    where
        F: FnOnce() + Send + 'static,
    {
        async move {
            let res = self.completion().await;
            f();
            res
        }
    }
}

impl<T> IntoFuture for TaskInstance<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, TaskError>;
    type IntoFuture = BoxFuture<'static, Result<T, TaskError>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.completion().await }.boxed()
    }
}

/// Yielding a child instance waits for its outcome. Unless the child was performed
/// `unlinked()`, disposing the subscription (for example because the yielding
/// instance was canceled) cancels the child.
impl<T> Yieldable<T> for TaskInstance<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(self: Box<Self>, resumer: Resumer<T>) -> Option<Dispose> {
        let child = self.handle.clone();
        let waiter = tokio::spawn(async move { resumer.settle(self.completion().await) });
        Some(Box::new(move || {
            waiter.abort();
            if !child.core.is_unlinked() {
                child.cancel(YIELDER_CANCELED);
            }
        }))
    }
}

pub(crate) fn erase<T, Fut>(fut: Fut) -> crate::instance::core::BoxBody
where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    Box::pin(async move { fut.await.map(|v| Arc::new(v) as ErasedValue) })
}

fn downcast<T: Clone + 'static>(value: ErasedValue) -> Result<T, TaskError> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| TaskError::msg("task value has an unexpected type"))
}
