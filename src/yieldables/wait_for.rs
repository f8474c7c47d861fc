//! # Wait-for primitives.
//!
//! - [`wait_for_queue`] resumes on the next turn of a named [`RunLoop`] queue.
//! - [`wait_for_event`] resumes with the payload of the next occurrence of an event.
//! - [`wait_for_property`] resumes once a property satisfies a [`Predicate`].
//!
//! Event sources and observables are small traits so that application objects can
//! plug in; [`Emitter`] and [`PropertyBag`] are ready-made implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use crate::error::{ConfigError, TaskError};
use crate::host::RunLoop;
use crate::yieldables::{Dispose, Resumer, Yieldable};

// ---- queue ----

/// See [`wait_for_queue`].
#[derive(Debug, Clone)]
pub struct WaitForQueue {
    run_loop: RunLoop,
    queue: String,
}

/// Suspends until the run loop next flushes `queue`.
///
/// Fails fast with [`ConfigError::UnknownQueue`] for a queue the loop does not have.
pub fn wait_for_queue(
    run_loop: &RunLoop,
    queue: impl Into<String>,
) -> Result<WaitForQueue, ConfigError> {
    let queue = queue.into();
    if !run_loop.has_queue(&queue) {
        return Err(ConfigError::UnknownQueue { queue });
    }
    Ok(WaitForQueue {
        run_loop: run_loop.clone(),
        queue,
    })
}

impl Yieldable<()> for WaitForQueue {
    fn subscribe(self: Box<Self>, resumer: Resumer<()>) -> Option<Dispose> {
        let live = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&live);
        let on_error = resumer.clone();
        let job = move || {
            if flag.load(Ordering::Acquire) {
                resumer.resolve(());
            }
        };
        if let Err(err) = self.run_loop.schedule(&self.queue, job) {
            on_error.reject(TaskError::fail(err));
            return None;
        }
        Some(Box::new(move || live.store(false, Ordering::Release)))
    }
}

// ---- events ----

/// Event callback. Listeners are compared by identity.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Add/remove-listener style event source.
pub trait EventTarget<E>: Send + Sync {
    fn add_event_listener(&self, name: &str, listener: Listener<E>);
    fn remove_event_listener(&self, name: &str, listener: &Listener<E>);
}

/// On/off style event source.
pub trait Evented<E>: Send + Sync {
    fn on(&self, name: &str, listener: Listener<E>);
    fn off(&self, name: &str, listener: &Listener<E>);
}

/// Either flavour of event source.
pub enum EventSource<E> {
    Target(Arc<dyn EventTarget<E>>),
    Evented(Arc<dyn Evented<E>>),
}

impl<E> Clone for EventSource<E> {
    fn clone(&self) -> Self {
        match self {
            EventSource::Target(t) => EventSource::Target(Arc::clone(t)),
            EventSource::Evented(e) => EventSource::Evented(Arc::clone(e)),
        }
    }
}

impl<E> EventSource<E> {
    fn attach(&self, name: &str, listener: Listener<E>) {
        match self {
            EventSource::Target(t) => t.add_event_listener(name, listener),
            EventSource::Evented(e) => e.on(name, listener),
        }
    }

    fn detach(&self, name: &str, listener: &Listener<E>) {
        match self {
            EventSource::Target(t) => t.remove_event_listener(name, listener),
            EventSource::Evented(e) => e.off(name, listener),
        }
    }
}

/// See [`wait_for_event`].
pub struct WaitForEvent<E> {
    source: EventSource<E>,
    name: String,
}

/// Suspends until `source` fires `name` once; resumes with a clone of the payload.
///
/// The listener is removed as soon as it fires, or when the suspension is released.
pub fn wait_for_event<E>(source: EventSource<E>, name: impl Into<String>) -> WaitForEvent<E> {
    WaitForEvent {
        source,
        name: name.into(),
    }
}

impl<E> Yieldable<E> for WaitForEvent<E>
where
    E: Clone + Send + 'static,
{
    fn subscribe(self: Box<Self>, resumer: Resumer<E>) -> Option<Dispose> {
        let WaitForEvent { source, name } = *self;
        let me: Arc<OnceLock<Weak<dyn Fn(&E) + Send + Sync>>> = Arc::new(OnceLock::new());
        let fired = AtomicBool::new(false);

        let listener: Listener<E> = {
            let me = Arc::clone(&me);
            let source = source.clone();
            let name = name.clone();
            Arc::new(move |payload: &E| {
                if fired.swap(true, Ordering::AcqRel) {
                    return;
                }
                resumer.resolve(payload.clone());
                if let Some(this) = me.get().and_then(Weak::upgrade) {
                    source.detach(&name, &this);
                }
            })
        };
        let _ = me.set(Arc::downgrade(&listener));

        source.attach(&name, Arc::clone(&listener));
        Some(Box::new(move || source.detach(&name, &listener)))
    }
}

/// Minimal multi-event emitter implementing both [`EventTarget`] and [`Evented`].
pub struct Emitter<E> {
    listeners: Mutex<HashMap<String, Vec<Listener<E>>>>,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener<E>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls every listener registered for `name`.
    ///
    /// Listeners may add or remove listeners while being called.
    pub fn emit(&self, name: &str, payload: &E) {
        let snapshot: Vec<Listener<E>> = self.lock().get(name).cloned().unwrap_or_default();
        for listener in snapshot {
            listener(payload);
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    fn add(&self, name: &str, listener: Listener<E>) {
        self.lock().entry(name.to_string()).or_default().push(listener);
    }

    fn remove(&self, name: &str, listener: &Listener<E>) {
        let mut map = self.lock();
        if let Some(list) = map.get_mut(name) {
            list.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
            if list.is_empty() {
                map.remove(name);
            }
        }
    }
}

impl<E: Send + 'static> EventTarget<E> for Emitter<E> {
    fn add_event_listener(&self, name: &str, listener: Listener<E>) {
        self.add(name, listener);
    }

    fn remove_event_listener(&self, name: &str, listener: &Listener<E>) {
        self.remove(name, listener);
    }
}

impl<E: Send + 'static> Evented<E> for Emitter<E> {
    fn on(&self, name: &str, listener: Listener<E>) {
        self.add(name, listener);
    }

    fn off(&self, name: &str, listener: &Listener<E>) {
        self.remove(name, listener);
    }
}

// ---- properties ----

/// Property change callback, called with the new value.
pub type Observer<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Keyed property store that reports changes.
pub trait Observable<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn add_observer(&self, key: &str, observer: Observer<V>);
    fn remove_observer(&self, key: &str, observer: &Observer<V>);
}

/// Values with a notion of truthiness, used by [`Predicate::truthy`].
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

macro_rules! truthy_number {
    ($($t:ty),*) => {
        $(impl Truthy for $t {
            fn is_truthy(&self) -> bool {
                *self != 0
            }
        })*
    };
}

truthy_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Truthy for f64 {
    fn is_truthy(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.is_some()
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

/// Condition a property value must meet.
///
/// A plain value converts into an equality predicate:
/// ```rust
/// use cotask::yieldables::Predicate;
///
/// let p: Predicate<i32> = 5.into();
/// assert!(p.test(&5));
/// assert!(!p.test(&4));
/// ```
pub struct Predicate<V>(Arc<dyn Fn(&V) -> bool + Send + Sync>);

impl<V> Clone for Predicate<V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<V: 'static> Predicate<V> {
    /// Any truthy value.
    pub fn truthy() -> Self
    where
        V: Truthy,
    {
        Self(Arc::new(|v: &V| v.is_truthy()))
    }

    pub fn equals(target: V) -> Self
    where
        V: PartialEq + Send + Sync,
    {
        Self(Arc::new(move |v: &V| *v == target))
    }

    pub fn matching<F>(f: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn test(&self, value: &V) -> bool {
        (self.0)(value)
    }
}

impl<V> From<V> for Predicate<V>
where
    V: PartialEq + Send + Sync + 'static,
{
    fn from(target: V) -> Self {
        Predicate::equals(target)
    }
}

/// See [`wait_for_property`].
pub struct WaitForProperty<V> {
    source: Arc<dyn Observable<V>>,
    key: String,
    predicate: Predicate<V>,
}

/// Suspends until `source[key]` satisfies `predicate`; resumes with that value.
///
/// The current value is checked first: if it already satisfies the predicate the
/// suspension resolves without registering an observer.
pub fn wait_for_property<V>(
    source: Arc<dyn Observable<V>>,
    key: impl Into<String>,
    predicate: impl Into<Predicate<V>>,
) -> WaitForProperty<V> {
    WaitForProperty {
        source,
        key: key.into(),
        predicate: predicate.into(),
    }
}

impl<V> Yieldable<V> for WaitForProperty<V>
where
    V: Clone + Send + 'static,
{
    fn subscribe(self: Box<Self>, resumer: Resumer<V>) -> Option<Dispose> {
        let WaitForProperty {
            source,
            key,
            predicate,
        } = *self;

        if let Some(current) = source.get(&key) {
            if predicate.test(&current) {
                resumer.resolve(current);
                return None;
            }
        }

        let me: Arc<OnceLock<Weak<dyn Fn(&V) + Send + Sync>>> = Arc::new(OnceLock::new());
        let satisfied = AtomicBool::new(false);
        let observer: Observer<V> = {
            let me = Arc::clone(&me);
            let source = Arc::clone(&source);
            let key = key.clone();
            Arc::new(move |value: &V| {
                if !predicate.test(value) || satisfied.swap(true, Ordering::AcqRel) {
                    return;
                }
                resumer.resolve(value.clone());
                if let Some(this) = me.get().and_then(Weak::upgrade) {
                    source.remove_observer(&key, &this);
                }
            })
        };
        let _ = me.set(Arc::downgrade(&observer));

        source.add_observer(&key, Arc::clone(&observer));
        Some(Box::new(move || source.remove_observer(&key, &observer)))
    }
}

/// Simple [`Observable`] map.
pub struct PropertyBag<V> {
    values: Mutex<HashMap<String, V>>,
    observers: Mutex<HashMap<String, Vec<Observer<V>>>>,
}

impl<V> Default for PropertyBag<V> {
    fn default() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> fmt::Debug for PropertyBag<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBag").finish_non_exhaustive()
    }
}

impl<V: Clone> PropertyBag<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` and notifies the key's observers.
    pub fn set(&self, key: &str, value: V) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        let snapshot: Vec<Observer<V>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default();
        for observer in snapshot {
            observer(&value);
        }
    }

    pub fn observer_count(&self, key: &str) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl<V: Clone + Send + 'static> Observable<V> for PropertyBag<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn add_observer(&self, key: &str, observer: Observer<V>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push(observer);
    }

    fn remove_observer(&self, key: &str, observer: &Observer<V>) {
        let mut map = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = map.get_mut(key) {
            list.retain(|o| !std::ptr::addr_eq(Arc::as_ptr(o), Arc::as_ptr(observer)));
            if list.is_empty() {
                map.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::TaskInstance;
    use crate::host::RunLoop;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_property_already_satisfied_skips_subscription() {
        let bag = Arc::new(PropertyBag::new());
        bag.set("x", 5);
        let source: Arc<dyn Observable<i32>> = bag.clone();

        let inst = TaskInstance::create(move |ctx| async move {
            ctx.suspend(wait_for_property(source, "x", 5)).await
        });
        inst.start();
        assert_eq!(inst.completion().await.unwrap(), 5);
        assert_eq!(bag.observer_count("x"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_property_resumes_exactly_once() {
        let bag = Arc::new(PropertyBag::new());
        bag.set("x", 1);
        let source: Arc<dyn Observable<i32>> = bag.clone();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();

        let inst = TaskInstance::create(move |ctx| async move {
            let v = ctx.suspend(wait_for_property(source, "x", 5)).await?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TaskError>(v)
        });
        inst.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bag.observer_count("x"), 1);

        bag.set("x", 3);
        bag.set("x", 5);
        bag.set("x", 5);
        assert_eq!(inst.completion().await.unwrap(), 5);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bag.observer_count("x"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_property_truthy_default() {
        let bag = Arc::new(PropertyBag::<String>::new());
        let source: Arc<dyn Observable<String>> = bag.clone();
        let inst = TaskInstance::create(move |ctx| async move {
            ctx.suspend(wait_for_property(source, "name", Predicate::truthy()))
                .await
        });
        inst.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        bag.set("name", String::new());
        bag.set("name", "ada".to_string());
        assert_eq!(inst.completion().await.unwrap(), "ada");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_property_observer() {
        let bag = Arc::new(PropertyBag::new());
        let source: Arc<dyn Observable<bool>> = bag.clone();
        let inst = TaskInstance::create(move |ctx| async move {
            ctx.suspend(wait_for_property(source, "ready", true)).await
        });
        inst.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(bag.observer_count("ready"), 1);

        inst.cancel("gone");
        assert_eq!(bag.observer_count("ready"), 0);
        assert!(inst.completion().await.unwrap_err().is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_fires_once_for_both_styles() {
        let emitter = Arc::new(Emitter::<u32>::new());
        let sources = [
            EventSource::Target(emitter.clone() as Arc<dyn EventTarget<u32>>),
            EventSource::Evented(emitter.clone() as Arc<dyn Evented<u32>>),
        ];
        for source in sources {
            let inst = TaskInstance::create(move |ctx| async move {
                ctx.suspend(wait_for_event(source, "tick")).await
            });
            inst.start();
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(emitter.listener_count("tick"), 1);

            emitter.emit("tick", &7);
            emitter.emit("tick", &8);
            assert_eq!(emitter.listener_count("tick"), 0);
            assert_eq!(inst.completion().await.unwrap(), 7);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_event_listener() {
        let emitter = Arc::new(Emitter::<u32>::new());
        let sources = [
            EventSource::Target(emitter.clone() as Arc<dyn EventTarget<u32>>),
            EventSource::Evented(emitter.clone() as Arc<dyn Evented<u32>>),
        ];
        for source in sources {
            let inst = TaskInstance::create(move |ctx| async move {
                ctx.suspend(wait_for_event(source, "tick")).await
            });
            inst.start();
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(emitter.listener_count("tick"), 1);

            inst.cancel("gone");
            assert_eq!(emitter.listener_count("tick"), 0);
            emitter.emit("tick", &7);
            assert!(inst.completion().await.unwrap_err().is_cancellation());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_turn_resumes() {
        let run_loop = RunLoop::new(["render"]);
        assert!(wait_for_queue(&run_loop, "nope").is_err());

        let wait = wait_for_queue(&run_loop, "render").unwrap();
        let inst = TaskInstance::create(move |ctx| async move { ctx.suspend(wait).await });
        inst.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(inst.completion().await.is_ok());
    }
}
