//! # Instance core: the stepping state shared by handles, the driver and resumers.
//!
//! [`InstanceCore`] owns everything about one run of a task body except the body
//! future itself (which the driver owns once launched):
//!
//! ```text
//!            ┌──────────── InstanceCore ─────────────┐
//! resumers ──► proceed(generation, resume) ──► slot  │
//! cancel() ──► generation += 1, slot = Unwind        │──► waker ──► driver ──► body.poll()
//! retry    ──► timer ──► proceed(.., Continue)       │                           │
//!            └───────────────────────────────────────┘                    Suspend::poll
//!                                                                        take_resume()
//! ```
//!
//! ## Rules
//! - Terminal states never change; `settle` is a no-op after the first call.
//! - Finalizers fire exactly once, in registration order, outside the lock and
//!   before awaiters of the instance are woken.
//! - A resumption tagged with a generation other than the live suspension's is dropped.
//! - The lock is never held while polling the body, disposing a subscription,
//!   invoking a finalizer or calling into a retry policy.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::error::{TaskError, panic_message};
use crate::events::{Bus, Event, EventKind};
use crate::host::CancelationToken;
use crate::instance::{InstanceHandle, LINKED_PARENT_CANCELED, driver};
use crate::policies::RetryPolicy;

static INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased settled value.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Type-erased body future.
pub(crate) type BoxBody = Pin<Box<dyn Future<Output = Result<ErasedValue, TaskError>> + Send>>;

/// Releases a yieldable subscription.
pub type Dispose = Box<dyn FnOnce() + Send>;

type Finalizer = Box<dyn FnOnce(&InstanceHandle) + Send>;

/// Lifecycle state of a task instance.
///
/// `NotStarted → Running → {Succeeded, Errored, Canceled}`; `NotStarted → Canceled`
/// when an instance is dropped before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    NotStarted,
    Running,
    Succeeded,
    Errored,
    Canceled,
}

impl InstanceState {
    /// True for the three terminal states.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            InstanceState::Succeeded | InstanceState::Errored | InstanceState::Canceled
        )
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            InstanceState::NotStarted => "not_started",
            InstanceState::Running => "running",
            InstanceState::Succeeded => "succeeded",
            InstanceState::Errored => "errored",
            InstanceState::Canceled => "canceled",
        }
    }
}

/// What a suspension is resumed with.
pub(crate) enum Resume {
    Value(Box<dyn Any + Send>),
    Error(TaskError),
    /// Re-arm the suspension (retry timer fired).
    Continue,
    /// The instance was canceled; run the cleanup path.
    Unwind,
}

/// Result of trying to arm a new suspension.
pub(crate) enum Arm {
    Go(u64),
    Canceled(TaskError),
    /// Second suspension during unwind: the driver drops the body.
    Abandon,
}

/// Outcome of polling for a resumption.
pub(crate) enum Taken {
    Pending,
    Ready(Resume),
    Superseded,
}

struct Stepper {
    state: InstanceState,
    has_started: bool,
    body: Option<BoxBody>,
    gate: Option<BoxFuture<'static, Result<(), TaskError>>>,
    polled: bool,

    generation: u64,
    current: Option<u64>,
    rearmable: bool,
    slot: Option<(u64, Resume)>,
    subscription: Option<Dispose>,
    waker: Option<Waker>,

    cancel_reason: Option<Arc<str>>,
    unwinding: bool,
    cleanup_suspensions: u32,
    abandon: bool,

    retry_count: u32,
    is_retrying: bool,
    retry_timer: Option<AbortHandle>,

    value: Option<ErasedValue>,
    error: Option<TaskError>,
    finalizers: Vec<Finalizer>,
    linked: Vec<Weak<InstanceCore>>,
}

pub(crate) struct InstanceCore {
    id: u64,
    task: Arc<str>,
    retry: Arc<dyn RetryPolicy>,
    events: Option<Bus>,
    unlinked: bool,
    token: CancelationToken,
    status: watch::Sender<InstanceState>,
    inner: Mutex<Stepper>,
}

impl InstanceCore {
    pub(crate) fn new(
        task: Arc<str>,
        retry: Arc<dyn RetryPolicy>,
        events: Option<Bus>,
        unlinked: bool,
        token: CancelationToken,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(InstanceState::NotStarted);
        Arc::new(Self {
            id: INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            task,
            retry,
            events,
            unlinked,
            token,
            status,
            inner: Mutex::new(Stepper {
                state: InstanceState::NotStarted,
                has_started: false,
                body: None,
                gate: None,
                polled: false,
                generation: 0,
                current: None,
                rearmable: false,
                slot: None,
                subscription: None,
                waker: None,
                cancel_reason: None,
                unwinding: false,
                cleanup_suspensions: 0,
                abandon: false,
                retry_count: 0,
                is_retrying: false,
                retry_timer: None,
                value: None,
                error: None,
                finalizers: Vec::new(),
                linked: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Stepper> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- identity / flags ----

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn task_name(&self) -> &Arc<str> {
        &self.task
    }

    pub(crate) fn is_unlinked(&self) -> bool {
        self.unlinked
    }

    pub(crate) fn token(&self) -> &CancelationToken {
        &self.token
    }

    pub(crate) fn state(&self) -> InstanceState {
        self.lock().state
    }

    pub(crate) fn has_started(&self) -> bool {
        self.lock().has_started
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub(crate) fn is_retrying(&self) -> bool {
        self.lock().is_retrying
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.lock().cancel_reason.is_some()
    }

    /// Resolves once the instance reaches a terminal state.
    pub(crate) async fn settled(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| s.is_finished()).await;
    }

    /// Settled outcome, `None` while the instance is still pending.
    pub(crate) fn outcome(&self) -> Option<Result<ErasedValue, TaskError>> {
        let st = self.lock();
        match st.state {
            InstanceState::Succeeded => st.value.clone().map(Ok),
            InstanceState::Errored | InstanceState::Canceled => st.error.clone().map(Err),
            InstanceState::NotStarted | InstanceState::Running => None,
        }
    }

    pub(crate) fn error(&self) -> Option<TaskError> {
        self.lock().error.clone()
    }

    pub(crate) fn cancel_error(&self) -> TaskError {
        let reason = self.lock().cancel_reason.clone();
        TaskError::Canceled {
            reason: reason.unwrap_or_else(|| Arc::from("canceled")),
        }
    }

    // ---- setup / start ----

    pub(crate) fn install(&self, body: BoxBody) {
        self.lock().body = Some(body);
    }

    pub(crate) fn set_gate(&self, gate: BoxFuture<'static, Result<(), TaskError>>) {
        self.lock().gate = Some(gate);
    }

    pub(crate) fn link_child(&self, child: &Arc<InstanceCore>) {
        let mut st = self.lock();
        if st.cancel_reason.is_none() && !st.state.is_finished() {
            st.linked.push(Arc::downgrade(child));
            return;
        }
        drop(st);
        child.cancel(Arc::from(LINKED_PARENT_CANCELED));
    }

    /// Marks the instance started. Returns `false` if it already settled.
    pub(crate) fn admit(&self) -> bool {
        {
            let mut st = self.lock();
            if st.state != InstanceState::NotStarted {
                return false;
            }
            st.has_started = true;
            st.state = InstanceState::Running;
        }
        self.status.send_replace(InstanceState::Running);
        self.publish(EventKind::InstanceStarted, None);
        true
    }

    /// Spawns the driver. No-op if the body was already launched or dropped.
    pub(crate) fn launch(self: &Arc<Self>) {
        let (body, gate) = {
            let mut st = self.lock();
            if st.state.is_finished() {
                return;
            }
            match st.body.take() {
                Some(body) => (body, st.gate.take()),
                None => return,
            }
        };
        tokio::spawn(driver::drive(Arc::clone(self), body, gate));
    }

    // ---- stepping ----

    /// Polls the body once. `Ready(None)` means the instance already settled elsewhere.
    pub(crate) fn step(
        &self,
        cx: &mut Context<'_>,
        body: Pin<&mut (dyn Future<Output = Result<ErasedValue, TaskError>> + Send)>,
    ) -> Poll<Option<Result<ErasedValue, TaskError>>> {
        {
            let mut st = self.lock();
            if st.state.is_finished() {
                return Poll::Ready(None);
            }
            st.polled = true;
            st.waker = Some(cx.waker().clone());
        }

        let mut body = body;
        let polled = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            body.as_mut().poll(cx)
        }));
        match polled {
            Ok(Poll::Ready(out)) => Poll::Ready(Some(out)),
            Ok(Poll::Pending) => {
                let abandon = self.lock().abandon;
                if abandon {
                    Poll::Ready(Some(Err(self.cancel_error())))
                } else {
                    Poll::Pending
                }
            }
            Err(payload) => Poll::Ready(Some(Err(TaskError::msg(format!(
                "task body panicked: {}",
                panic_message(payload.as_ref())
            ))))),
        }
    }

    /// Arms a new suspension, disposing the previous subscription first.
    pub(crate) fn begin_suspension(&self, rearmable: bool) -> Arm {
        let (previous, arm) = {
            let mut st = self.lock();
            if st.abandon {
                return Arm::Abandon;
            }
            if st.cancel_reason.is_some() {
                if !st.unwinding {
                    st.unwinding = true;
                    drop(st);
                    return Arm::Canceled(self.cancel_error());
                }
                st.cleanup_suspensions += 1;
                if st.cleanup_suspensions > 1 {
                    st.abandon = true;
                    return Arm::Abandon;
                }
            }
            st.generation += 1;
            let generation = st.generation;
            st.current = Some(generation);
            st.rearmable = rearmable;
            st.slot = None;
            (st.subscription.take(), Arm::Go(generation))
        };
        if let Some(dispose) = previous {
            dispose();
        }
        arm
    }

    /// Stores the dispose handle of the subscription armed at `generation`.
    pub(crate) fn attach_subscription(&self, generation: u64, dispose: Option<Dispose>) {
        let Some(dispose) = dispose else { return };
        let mut st = self.lock();
        if st.current == Some(generation) {
            st.subscription = Some(dispose);
            return;
        }
        drop(st);
        dispose();
    }

    /// Takes the resumption for the suspension armed at `generation`.
    ///
    /// On `Pending` the suspension's waker replaces the driver's, so a resumption
    /// wakes the innermost future that is actually waiting.
    pub(crate) fn take_resume(&self, generation: u64, waker: &Waker) -> Taken {
        let (taken, dispose) = {
            let mut st = self.lock();
            match st.slot.take() {
                None if st.current == Some(generation) || st.cancel_reason.is_some() => {
                    st.waker = Some(waker.clone());
                    return Taken::Pending;
                }
                None => return Taken::Superseded,
                Some((tag, resume)) if tag == generation => {
                    if matches!(resume, Resume::Continue) {
                        st.is_retrying = false;
                        return Taken::Ready(resume);
                    }
                    st.current = None;
                    (Taken::Ready(resume), st.subscription.take())
                }
                Some(other) => {
                    st.slot = Some(other);
                    return Taken::Superseded;
                }
            }
        };
        if let Some(dispose) = dispose {
            dispose();
        }
        taken
    }

    /// Releases a suspension whose future was dropped before it resumed.
    pub(crate) fn drop_suspension(&self, generation: u64) {
        let dispose = {
            let mut st = self.lock();
            if st.slot.as_ref().is_some_and(|(tag, _)| *tag == generation) {
                st.slot = None;
            }
            if st.current != Some(generation) {
                return;
            }
            st.current = None;
            st.subscription.take()
        };
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    /// Resumes the live suspension if `generation` still matches it.
    pub(crate) fn proceed(self: &Arc<Self>, generation: u64, resume: Resume) {
        let retry_candidate = {
            let st = self.lock();
            if st.current != Some(generation) || st.state.is_finished() || st.slot.is_some() {
                return;
            }
            match &resume {
                Resume::Error(e)
                    if st.rearmable && st.cancel_reason.is_none() && !e.is_cancellation() =>
                {
                    Some(e.clone())
                }
                _ => None,
            }
        };

        if let Some(error) = retry_candidate {
            let handle = InstanceHandle::from_core(Arc::clone(self));
            if self.retry.should_retry(&handle, &error) {
                let failed = self.lock().subscription.take();
                if let Some(dispose) = failed {
                    dispose();
                }
                self.retry.retry(&handle);
                return;
            }
        }

        let waker = {
            let mut st = self.lock();
            if st.current != Some(generation) || st.slot.is_some() {
                return;
            }
            st.slot = Some((generation, resume));
            st.waker.clone()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    // ---- retry ----

    pub(crate) fn retry_after(self: &Arc<Self>, delay: Duration) {
        let (generation, attempt) = {
            let mut st = self.lock();
            let Some(generation) = st.current else { return };
            if st.state.is_finished() || st.cancel_reason.is_some() {
                return;
            }
            st.retry_count += 1;
            st.is_retrying = true;
            (generation, st.retry_count)
        };

        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = weak.upgrade() {
                core.proceed(generation, Resume::Continue);
            }
        });
        let previous = self.lock().retry_timer.replace(timer.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }

        if let Some(bus) = &self.events {
            bus.publish(
                Event::for_instance(EventKind::RetryScheduled, Arc::clone(&self.task), self.id)
                    .with_attempt(attempt)
                    .with_delay(delay),
            );
        }
    }

    pub(crate) fn clear_retry(&self) {
        let timer = {
            let mut st = self.lock();
            st.is_retrying = false;
            st.retry_timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    // ---- cancel / settle ----

    pub(crate) fn cancel(self: &Arc<Self>, reason: Arc<str>) {
        let (subscription, settle_now, waker, linked) = {
            let mut st = self.lock();
            if st.cancel_reason.is_some() || st.state.is_finished() {
                return;
            }
            st.cancel_reason = Some(Arc::clone(&reason));
            st.generation += 1;
            if let Some(generation) = st.current.take() {
                st.slot = Some((generation, Resume::Unwind));
                st.unwinding = true;
            }
            (
                st.subscription.take(),
                !st.polled,
                st.waker.clone(),
                std::mem::take(&mut st.linked),
            )
        };

        self.token.cancel();
        if let Some(dispose) = subscription {
            dispose();
        }
        self.retry.reset(&InstanceHandle::from_core(Arc::clone(self)));
        for child in linked.iter().filter_map(Weak::upgrade) {
            child.cancel(Arc::from(LINKED_PARENT_CANCELED));
        }

        if settle_now {
            self.settle(Err(TaskError::Canceled { reason }));
        } else if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn settle(self: &Arc<Self>, outcome: Result<ErasedValue, TaskError>) {
        let (state, leftovers, finalizers) = {
            let mut st = self.lock();
            if st.state.is_finished() {
                return;
            }
            let state = match (st.cancel_reason.clone(), outcome) {
                (Some(reason), _) => {
                    st.error = Some(TaskError::Canceled { reason });
                    InstanceState::Canceled
                }
                (None, Ok(value)) => {
                    st.value = Some(value);
                    InstanceState::Succeeded
                }
                (None, Err(error)) if error.is_cancellation() => {
                    st.cancel_reason = error.reason().map(Arc::from);
                    st.error = Some(error);
                    InstanceState::Canceled
                }
                (None, Err(error)) => {
                    st.error = Some(error);
                    InstanceState::Errored
                }
            };
            st.state = state;
            st.current = None;
            st.slot = None;
            st.waker = None;
            let leftovers = (st.subscription.take(), st.body.take(), st.gate.take());
            (state, leftovers, std::mem::take(&mut st.finalizers))
        };

        let (subscription, body, gate) = leftovers;
        drop(body);
        drop(gate);
        if let Some(dispose) = subscription {
            dispose();
        }

        let handle = InstanceHandle::from_core(Arc::clone(self));
        self.retry.reset(&handle);
        for finalizer in finalizers {
            finalizer(&handle);
        }

        self.status.send_replace(state);
        self.publish_settled(state);
    }

    /// Registers a callback fired once on settle (immediately if already settled).
    pub(crate) fn on_finalize(self: &Arc<Self>, finalizer: Finalizer) {
        {
            let mut st = self.lock();
            if !st.state.is_finished() {
                st.finalizers.push(finalizer);
                return;
            }
        }
        finalizer(&InstanceHandle::from_core(Arc::clone(self)));
    }

    fn publish_settled(&self, state: InstanceState) {
        let (kind, reason) = match state {
            InstanceState::Succeeded => (EventKind::InstanceSucceeded, None),
            InstanceState::Errored => (
                EventKind::InstanceErrored,
                self.error().map(|e| e.as_message()),
            ),
            InstanceState::Canceled => (
                EventKind::InstanceCanceled,
                self.lock().cancel_reason.as_deref().map(String::from),
            ),
            InstanceState::NotStarted | InstanceState::Running => return,
        };
        self.publish(kind, reason);
    }

    fn publish(&self, kind: EventKind, reason: Option<String>) {
        let Some(bus) = &self.events else { return };
        let mut ev = Event::for_instance(kind, Arc::clone(&self.task), self.id);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        bus.publish(ev);
    }
}

impl std::fmt::Debug for InstanceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCore")
            .field("id", &self.id)
            .field("task", &self.task)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
