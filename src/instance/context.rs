//! # Task context and the suspension future.
//!
//! The body of every task receives a [`TaskContext`]. Awaiting
//! [`TaskContext::suspend`] subscribes to a [`Yieldable`] and parks the body
//! until the yieldable resolves, rejects, or the instance is canceled.
//!
//! A body waits on one suspension at a time. Arming a new suspension releases
//! the previous one, so parallel waits go through the combinators
//! ([`all`](crate::all), [`race`](crate::race), ...) which are yieldables themselves.
//!
//! Cancellation only lands at a `suspend` boundary. A body that awaits some
//! other future directly (`tokio::time::sleep(..).await`, a raw channel, a
//! socket read) keeps running until that await completes; its next `suspend`
//! then returns [`TaskError::Canceled`], and a body that finishes without one
//! still settles as canceled. Wrap long waits in [`yieldables::future`](crate::yieldables::future) or
//! [`yieldables::timeout`](crate::yieldables::timeout) to make them cancelable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::TaskError;
use crate::host::{CancelationToken, Host};
use crate::instance::InstanceHandle;
use crate::instance::core::{Arm, InstanceCore, Resume, Taken};
use crate::yieldables::{Resumer, Yieldable};

/// Handle given to a task body.
#[derive(Clone)]
pub struct TaskContext {
    core: Arc<InstanceCore>,
    host: Option<Host>,
}

impl TaskContext {
    pub(crate) fn new(core: Arc<InstanceCore>, host: Option<Host>) -> Self {
        Self { core, host }
    }

    pub(crate) fn core(&self) -> &Arc<InstanceCore> {
        &self.core
    }

    /// Suspends the body until `yieldable` settles.
    ///
    /// If the instance is canceled while suspended, resolves with
    /// [`TaskError::Canceled`] so the body can clean up. Futures awaited
    /// outside `suspend` are not interrupted by a cancel.
    pub fn suspend<T, Y>(&self, yieldable: Y) -> Suspend<T>
    where
        T: Send + 'static,
        Y: Yieldable<T> + 'static,
    {
        Suspend {
            core: Arc::clone(&self.core),
            source: Source::Once(Some(Box::new(yieldable))),
            rearmable: false,
            armed: None,
        }
    }

    /// Like [`suspend`](Self::suspend), but re-subscribes to a fresh yieldable
    /// from `factory` whenever the task's retry policy schedules a retry.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use cotask::{yieldables, TaskContext, TaskError};
    ///
    /// async fn fetch(ctx: TaskContext) -> Result<u32, TaskError> {
    ///     ctx.suspend_with(|| yieldables::try_future(async { Ok::<_, TaskError>(7) }))
    ///         .await
    /// }
    /// ```
    pub fn suspend_with<T, Y, F>(&self, mut factory: F) -> Suspend<T>
    where
        T: Send + 'static,
        Y: Yieldable<T> + 'static,
        F: FnMut() -> Y + Send + 'static,
    {
        Suspend {
            core: Arc::clone(&self.core),
            source: Source::Rearm(Box::new(move || Box::new(factory()))),
            rearmable: true,
            armed: None,
        }
    }

    /// Handle to the instance running this body.
    pub fn instance(&self) -> InstanceHandle {
        InstanceHandle::from_core(Arc::clone(&self.core))
    }

    pub fn token(&self) -> CancelationToken {
        self.core.token().clone()
    }

    /// True once the instance was canceled or its host was destroyed.
    pub fn is_cancelation_requested(&self) -> bool {
        self.core.token().is_cancelation_requested()
    }

    /// The host the task was built on; `None` for standalone instances.
    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("instance", &self.core.id())
            .field("task", self.core.task_name())
            .finish()
    }
}

enum Source<T> {
    Once(Option<Box<dyn Yieldable<T>>>),
    Rearm(Box<dyn FnMut() -> Box<dyn Yieldable<T>> + Send>),
}

impl<T> Source<T> {
    fn next(&mut self) -> Option<Box<dyn Yieldable<T>>> {
        match self {
            Source::Once(y) => y.take(),
            Source::Rearm(factory) => Some(factory()),
        }
    }
}

/// Future returned by [`TaskContext::suspend`].
///
/// Dropping it before it resolves releases the subscription.
#[must_use = "a suspension does nothing unless awaited"]
pub struct Suspend<T> {
    core: Arc<InstanceCore>,
    source: Source<T>,
    rearmable: bool,
    armed: Option<u64>,
}

impl<T> Unpin for Suspend<T> {}

impl<T: Send + 'static> Future for Suspend<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            let generation = match this.armed {
                Some(generation) => generation,
                None => match this.core.begin_suspension(this.rearmable) {
                    Arm::Go(generation) => {
                        let Some(yieldable) = this.source.next() else {
                            this.core.drop_suspension(generation);
                            return Poll::Ready(Err(TaskError::msg(
                                "suspension polled after completion",
                            )));
                        };
                        this.armed = Some(generation);
                        let resumer = Resumer::new(Arc::downgrade(&this.core), generation);
                        let dispose = yieldable.subscribe(resumer);
                        this.core.attach_subscription(generation, dispose);
                        generation
                    }
                    Arm::Canceled(err) => return Poll::Ready(Err(err)),
                    Arm::Abandon => return Poll::Pending,
                },
            };

            let resume = match this.core.take_resume(generation, cx.waker()) {
                Taken::Pending => return Poll::Pending,
                Taken::Ready(resume) => resume,
                Taken::Superseded => {
                    this.armed = None;
                    return Poll::Ready(Err(TaskError::msg("suspension superseded")));
                }
            };
            this.armed = None;
            return Poll::Ready(match resume {
                Resume::Value(value) => value.downcast::<T>().map(|v| *v).map_err(|_| {
                    TaskError::msg("resumed with a value of an unexpected type")
                }),
                Resume::Error(err) => Err(err),
                Resume::Unwind => Err(this.core.cancel_error()),
                Resume::Continue => continue,
            });
        }
    }
}

impl<T> Drop for Suspend<T> {
    fn drop(&mut self) {
        if let Some(generation) = self.armed.take() {
            self.core.drop_suspension(generation);
        }
    }
}
