//! # Cancelable combinators.
//!
//! [`all`], [`race`], [`hash`] and [`all_settled`] compose instances and plain
//! futures into one [`Combined`] value that can be awaited directly or yielded
//! from a task body.
//!
//! Every `Combined` carries a cancel hook. It fires once, when the composition
//! settles, when [`Combined::cancel`] is called, or when the `Combined` is dropped
//! or disposed while pending. Firing cancels every instance member that has not
//! finished; plain futures are simply dropped with the composition.
//!
//! ```text
//! race([a, b, c]) ── a resolves ──► hook fires ──► b.cancel(), c.cancel()
//! all([a, b])     ── a rejects  ──► hook fires ──► b.cancel()  ──► Err(a's error)
//! ```
//!
//! When there is nothing to wait for (no members, or only instances that already
//! finished) the result is available right away and yielding it resumes within the
//! same step.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all, select_all, try_join_all};

use crate::error::TaskError;
use crate::instance::{Dispose, InstanceHandle, TaskInstance};
use crate::yieldables::{Resumer, Yieldable};

/// Reason given to instance members canceled by a combinator.
pub(crate) const COMBINATOR_CANCELED: &str = "a combinator it belonged to settled or was canceled";

/// One input of a combinator.
pub enum Member<T> {
    /// A task instance; canceled when the combinator's hook fires.
    Instance(TaskInstance<T>),
    /// Any other future; dropped with the composition.
    Future(BoxFuture<'static, Result<T, TaskError>>),
}

impl<T> Member<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        Member::Future(fut.boxed())
    }

    fn handle(&self) -> Option<&InstanceHandle> {
        match self {
            Member::Instance(inst) => Some(inst.handle()),
            Member::Future(_) => None,
        }
    }

    /// Outcome of an instance member that already finished.
    fn settled(&self) -> Option<Result<T, TaskError>> {
        match self {
            Member::Instance(inst) => inst.outcome(),
            Member::Future(_) => None,
        }
    }

    fn into_future(self) -> BoxFuture<'static, Result<T, TaskError>> {
        match self {
            Member::Instance(inst) => inst.into_future(),
            Member::Future(fut) => fut,
        }
    }
}

impl<T> From<TaskInstance<T>> for Member<T> {
    fn from(inst: TaskInstance<T>) -> Self {
        Member::Instance(inst)
    }
}

impl<T> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Instance(inst) => f.debug_tuple("Instance").field(inst).finish(),
            Member::Future(_) => f.write_str("Future"),
        }
    }
}

/// Outcome of one member of [`all_settled`].
#[derive(Debug, Clone)]
pub enum Settled<T> {
    Fulfilled(T),
    Rejected(TaskError),
}

impl<T> Settled<T> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settled::Fulfilled(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Settled::Fulfilled(value) => Some(value),
            Settled::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Settled::Fulfilled(_) => None,
            Settled::Rejected(error) => Some(error),
        }
    }
}

impl<T> From<Result<T, TaskError>> for Settled<T> {
    fn from(res: Result<T, TaskError>) -> Self {
        match res {
            Ok(value) => Settled::Fulfilled(value),
            Err(error) => Settled::Rejected(error),
        }
    }
}

struct CancelHook {
    members: Vec<InstanceHandle>,
    fired: AtomicBool,
}

impl CancelHook {
    fn new<'a, T: 'a>(members: impl IntoIterator<Item = &'a Member<T>>) -> Arc<Self>
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::new(Self {
            members: members.into_iter().filter_map(Member::handle).cloned().collect(),
            fired: AtomicBool::new(false),
        })
    }

    fn fire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        for member in self.members.iter().filter(|m| !m.is_finished()) {
            member.cancel(COMBINATOR_CANCELED);
        }
    }
}

enum Inner<O> {
    Ready(Option<Result<O, TaskError>>),
    Pending(BoxFuture<'static, Result<O, TaskError>>),
}

/// A cancelable composition of instances and futures.
///
/// Await it directly or yield it with `ctx.suspend(..)`.
pub struct Combined<O> {
    inner: Inner<O>,
    hook: Arc<CancelHook>,
}

impl<O: Send + 'static> Combined<O> {
    fn ready(out: Result<O, TaskError>, hook: Arc<CancelHook>) -> Self {
        hook.fire();
        Self {
            inner: Inner::Ready(Some(out)),
            hook,
        }
    }

    fn pending<F>(fut: F, hook: Arc<CancelHook>) -> Self
    where
        F: Future<Output = Result<O, TaskError>> + Send + 'static,
    {
        Self {
            inner: Inner::Pending(fut.boxed()),
            hook,
        }
    }

    /// True when the outcome is available without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, Inner::Ready(Some(_)))
    }

    /// Cancels every unfinished instance member. Idempotent.
    ///
    /// The composition still settles, typically with the cancellation error of the
    /// first canceled member.
    pub fn cancel(&self) {
        self.hook.fire();
    }

    fn take_ready(&mut self) -> Option<Result<O, TaskError>> {
        match &mut self.inner {
            Inner::Ready(out) => out.take(),
            Inner::Pending(_) => None,
        }
    }
}

impl<O> Unpin for Combined<O> {}

impl<O: Send + 'static> Future for Combined<O> {
    type Output = Result<O, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let out = match &mut this.inner {
            Inner::Ready(out) => out
                .take()
                .unwrap_or_else(|| Err(TaskError::msg("combinator polled after completion"))),
            Inner::Pending(fut) => match fut.poll_unpin(cx) {
                Poll::Ready(out) => out,
                Poll::Pending => return Poll::Pending,
            },
        };
        this.inner = Inner::Ready(None);
        this.hook.fire();
        Poll::Ready(out)
    }
}

impl<O> Drop for Combined<O> {
    fn drop(&mut self) {
        self.hook.fire();
    }
}

impl<O> fmt::Debug for Combined<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combined")
            .field("ready", &matches!(self.inner, Inner::Ready(_)))
            .field("members", &self.hook.members.len())
            .finish()
    }
}

impl<O: Send + 'static> Yieldable<O> for Combined<O> {
    fn subscribe(mut self: Box<Self>, resumer: Resumer<O>) -> Option<Dispose> {
        if let Some(out) = self.take_ready() {
            resumer.settle(out);
            return None;
        }
        let hook = Arc::clone(&self.hook);
        let waiter = tokio::spawn(async move { resumer.settle(self.await) });
        Some(Box::new(move || {
            waiter.abort();
            hook.fire();
        }))
    }
}

/// Resolves with every value in order; the first error rejects and cancels the rest.
pub fn all<T, I>(members: I) -> Combined<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Member<T>>,
{
    let members: Vec<Member<T>> = members.into_iter().collect();
    let hook = CancelHook::new(&members);

    let done: Option<Vec<T>> = members
        .iter()
        .map(|m| m.settled().and_then(Result::ok))
        .collect();
    if let Some(values) = done {
        return Combined::ready(Ok(values), hook);
    }
    let futs: Vec<_> = members.into_iter().map(Member::into_future).collect();
    Combined::pending(try_join_all(futs), hook)
}

/// Settles like the first member to settle; the others are canceled.
///
/// With no members the result rejects immediately.
pub fn race<T, I>(members: I) -> Combined<T>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Member<T>>,
{
    let members: Vec<Member<T>> = members.into_iter().collect();
    let hook = CancelHook::new(&members);

    if members.is_empty() {
        return Combined::ready(Err(TaskError::msg("race called without members")), hook);
    }
    if let Some(first) = members.iter().find_map(Member::settled) {
        return Combined::ready(first, hook);
    }
    let futs: Vec<_> = members.into_iter().map(Member::into_future).collect();
    Combined::pending(select_all(futs).map(|(out, _, _rest)| out), hook)
}

/// Like [`all`] over keyed members; resolves with a map of values.
pub fn hash<K, T, I>(members: I) -> Combined<HashMap<K, T>>
where
    K: Eq + Hash + Send + 'static,
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = (K, Member<T>)>,
{
    let (keys, members): (Vec<K>, Vec<Member<T>>) = members.into_iter().unzip();
    let hook = CancelHook::new(&members);

    let done: Option<Vec<T>> = members
        .iter()
        .map(|m| m.settled().and_then(Result::ok))
        .collect();
    if let Some(values) = done {
        return Combined::ready(Ok(keys.into_iter().zip(values).collect()), hook);
    }
    let futs: Vec<_> = members.into_iter().map(Member::into_future).collect();
    Combined::pending(
        try_join_all(futs).map(move |res| res.map(|values| keys.into_iter().zip(values).collect())),
        hook,
    )
}

/// Waits for every member and reports each outcome; never rejects.
pub fn all_settled<T, I>(members: I) -> Combined<Vec<Settled<T>>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Member<T>>,
{
    let members: Vec<Member<T>> = members.into_iter().collect();
    let hook = CancelHook::new(&members);

    let done: Option<Vec<Settled<T>>> = members
        .iter()
        .map(|m| m.settled().map(Settled::from))
        .collect();
    if let Some(outcomes) = done {
        return Combined::ready(Ok(outcomes), hook);
    }
    let futs: Vec<_> = members.into_iter().map(Member::into_future).collect();
    Combined::pending(
        join_all(futs).map(|outs| Ok(outs.into_iter().map(Settled::from).collect())),
        hook,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskContext, yieldables};
    use std::time::Duration;

    fn after(ms: u64, out: Result<u32, TaskError>) -> TaskInstance<u32> {
        let inst = TaskInstance::create(move |ctx: TaskContext| async move {
            ctx.suspend(yieldables::timeout(Duration::from_millis(ms))).await?;
            out
        });
        inst.start();
        inst
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failure_cancels_pending_siblings() {
        let failing = after(10, Err(TaskError::msg("boom")));
        let slow = after(1_000, Ok(2));

        let err = all([Member::from(failing.clone()), Member::from(slow.clone())])
            .await
            .unwrap_err();
        assert_eq!(err.as_message(), "error: boom");
        assert!(slow.completion().await.unwrap_err().is_cancellation());
        assert!(slow.has_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_cancels_losers() {
        let fast = after(10, Ok(1));
        let slow = after(1_000, Ok(2));

        let winner = race([Member::from(slow.clone()), Member::from(fast.clone())]).await;
        assert_eq!(winner.unwrap(), 1);
        assert!(slow.completion().await.unwrap_err().is_cancellation());
        assert!(fast.is_successful());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_inputs() {
        assert!(all(Vec::<Member<u32>>::new()).is_ready());
        assert_eq!(all(Vec::<Member<u32>>::new()).await.unwrap(), Vec::<u32>::new());
        assert!(race(Vec::<Member<u32>>::new()).await.is_err());
        assert!(hash(Vec::<(&str, Member<u32>)>::new()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_instances_take_fast_path() {
        let a = after(1, Ok(1));
        let b = after(2, Ok(2));
        a.completion().await.unwrap();
        b.completion().await.unwrap();

        let combined = hash([("a", Member::from(a)), ("b", Member::from(b))]);
        assert!(combined.is_ready());
        let map = combined.await.unwrap();
        assert_eq!((map["a"], map["b"]), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_settled_mixes_outcomes() {
        let ok = after(5, Ok(7));
        let bad = after(10, Err(TaskError::msg("nope")));
        let plain = Member::future(async { Ok(9) });

        let outs = all_settled([Member::from(ok), Member::from(bad), plain]).await.unwrap();
        assert_eq!(outs[0].value(), Some(&7));
        assert!(!outs[1].is_fulfilled());
        assert_eq!(outs[2].value(), Some(&9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_or_cancel_cancels_members() {
        let a = after(1_000, Ok(1));
        drop(all([Member::from(a.clone())]));
        assert!(a.completion().await.unwrap_err().is_cancellation());

        let b = after(1_000, Ok(2));
        let combined = race([Member::from(b.clone())]);
        combined.cancel();
        combined.cancel();
        assert!(combined.await.unwrap_err().is_cancellation());
        assert!(b.is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_yielded_combinator_canceled_with_instance() {
        let child = after(1_000, Ok(1));
        let watched = child.clone();
        let parent = TaskInstance::create(move |ctx: TaskContext| async move {
            let values = ctx.suspend(all([Member::from(child)])).await?;
            Ok::<_, TaskError>(values.len())
        });
        parent.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        parent.cancel("stop");
        assert!(parent.completion().await.unwrap_err().is_cancellation());
        assert!(watched.completion().await.unwrap_err().is_cancellation());
    }
}
