//! # Yieldables: values a task body can suspend on.
//!
//! A [`Yieldable<T>`] is subscribed once per suspension. It receives a
//! [`Resumer<T>`] and returns an optional [`Dispose`] that releases whatever it
//! registered (a spawned future, an event listener, a run-loop job...).
//!
//! Resumers are tagged with the generation of the suspension they were issued
//! for; a resumption that arrives after the suspension ended (resolved, disposed
//! or canceled) is ignored. Only the first resumption of a suspension counts.
//!
//! ## Adapters
//! - [`future`] / [`try_future`] any future
//! - [`ready`] an already available value
//! - [`stream`] the first item of a stream
//! - [`timeout`] a plain delay
//! - [`wait_for_queue`], [`wait_for_event`], [`wait_for_property`]
//!
//! [`TaskInstance`](crate::TaskInstance) and the combinator results are
//! yieldables too.

mod wait_for;

pub use wait_for::{
    Emitter, EventSource, EventTarget, Evented, Listener, Observable, Observer, Predicate,
    PropertyBag, Truthy, WaitForEvent, WaitForProperty, WaitForQueue, wait_for_event,
    wait_for_property, wait_for_queue,
};

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Weak;
use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::TaskError;
use crate::instance::core::{InstanceCore, Resume};

pub use crate::instance::Dispose;

/// Something a task body can suspend on.
pub trait Yieldable<T>: Send {
    /// Starts observing and arranges for `resumer` to be called once.
    ///
    /// May resolve synchronously, before returning.
    fn subscribe(self: Box<Self>, resumer: Resumer<T>) -> Option<Dispose>;
}

/// Resumes one suspension with a value or an error.
pub struct Resumer<T> {
    core: Weak<InstanceCore>,
    generation: u64,
    _value: PhantomData<fn(T)>,
}

impl<T> Clone for Resumer<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            generation: self.generation,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Resumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Resumer<T> {
    pub(crate) fn new(core: Weak<InstanceCore>, generation: u64) -> Self {
        Self {
            core,
            generation,
            _value: PhantomData,
        }
    }

    pub fn resolve(&self, value: T) {
        self.proceed(Resume::Value(Box::new(value)));
    }

    pub fn reject(&self, error: TaskError) {
        self.proceed(Resume::Error(error));
    }

    pub fn settle(&self, outcome: Result<T, TaskError>) {
        match outcome {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    fn proceed(&self, resume: Resume) {
        if let Some(core) = self.core.upgrade() {
            core.proceed(self.generation, resume);
        }
    }
}

/// See [`future`].
pub struct FutureYield<F>(F);

/// See [`try_future`].
pub struct TryFutureYield<F>(F);

/// See [`ready`].
#[derive(Debug, Clone)]
pub struct Ready<T>(T);

/// See [`stream`].
pub struct FirstItem<S>(S);

/// See [`timeout`].
#[derive(Debug, Clone, Copy)]
pub struct Timeout(Duration);

/// Suspends until `fut` completes. Disposing aborts it.
pub fn future<F>(fut: F) -> FutureYield<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    FutureYield(fut)
}

/// Suspends until `fut` completes; an `Err` is thrown into the body.
pub fn try_future<T, F>(fut: F) -> TryFutureYield<F>
where
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: Send + 'static,
{
    TryFutureYield(fut)
}

/// Resumes immediately with `value`.
pub fn ready<T: Send + 'static>(value: T) -> Ready<T> {
    Ready(value)
}

/// Suspends until `stream` produces its first item; an empty stream rejects.
pub fn stream<S>(stream: S) -> FirstItem<S>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    FirstItem(stream)
}

/// Suspends for `delay`.
pub fn timeout(delay: Duration) -> Timeout {
    Timeout(delay)
}

impl<F> Yieldable<F::Output> for FutureYield<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn subscribe(self: Box<Self>, resumer: Resumer<F::Output>) -> Option<Dispose> {
        let fut = self.0;
        let handle = tokio::spawn(async move { resumer.resolve(fut.await) });
        Some(Box::new(move || handle.abort()))
    }
}

impl<T, F> Yieldable<T> for TryFutureYield<F>
where
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: Send + 'static,
{
    fn subscribe(self: Box<Self>, resumer: Resumer<T>) -> Option<Dispose> {
        let fut = self.0;
        let handle = tokio::spawn(async move { resumer.settle(fut.await) });
        Some(Box::new(move || handle.abort()))
    }
}

impl<T: Send + 'static> Yieldable<T> for Ready<T> {
    fn subscribe(self: Box<Self>, resumer: Resumer<T>) -> Option<Dispose> {
        resumer.resolve(self.0);
        None
    }
}

impl<S> Yieldable<S::Item> for FirstItem<S>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    fn subscribe(self: Box<Self>, resumer: Resumer<S::Item>) -> Option<Dispose> {
        let stream = self.0;
        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            match stream.next().await {
                Some(item) => resumer.resolve(item),
                None => resumer.reject(TaskError::msg("stream ended without producing a value")),
            }
        });
        Some(Box::new(move || handle.abort()))
    }
}

impl Yieldable<()> for Timeout {
    fn subscribe(self: Box<Self>, resumer: Resumer<()>) -> Option<Dispose> {
        let delay = self.0;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            resumer.resolve(());
        });
        Some(Box::new(move || handle.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskInstance;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_future_value() {
        let inst = TaskInstance::create(|ctx| async move {
            let n = ctx.suspend(future(async { 40 + 2 })).await?;
            Ok::<_, TaskError>(n)
        });
        inst.start();
        assert_eq!(inst.completion().await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_first_item_and_empty() {
        let inst = TaskInstance::create(|ctx| async move {
            let first = ctx.suspend(stream(futures::stream::iter([7, 8, 9]))).await?;
            let empty = ctx
                .suspend(stream(futures::stream::empty::<i32>()))
                .await;
            Ok::<_, TaskError>((first, empty.is_err()))
        });
        inst.start();
        assert_eq!(inst.completion().await.unwrap(), (7, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pending_future() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let inst = TaskInstance::create(move |ctx| async move {
            ctx.suspend(future(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
            }))
            .await
        });
        inst.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        inst.cancel("stop");
        assert!(inst.completion().await.unwrap_err().is_cancellation());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_resumption_wins() {
        struct Twice;
        impl Yieldable<u8> for Twice {
            fn subscribe(self: Box<Self>, resumer: Resumer<u8>) -> Option<Dispose> {
                resumer.resolve(1);
                resumer.resolve(2);
                resumer.reject(TaskError::msg("late"));
                None
            }
        }

        let inst = TaskInstance::create(|ctx| async move { ctx.suspend(Twice).await });
        inst.start();
        assert_eq!(inst.completion().await.unwrap(), 1);
    }
}
