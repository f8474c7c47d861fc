//! Fan-out of bus events to subscribers.
//!
//! ```text
//!                 wants(kind)?
//! emit(&Event) ──┬────────────► lane "log-writer" ─► worker ─► on_event
//!                ├────────────► lane "metrics"    ─► worker ─► on_event
//!                └──── no ────► skipped
//! ```
//!
//! A lane is a bounded mpsc queue plus the worker draining it, so each subscriber
//! sees its events in publish order. `emit` only does `try_send`: a full or closed
//! lane drops that event for that subscriber and a `SubscriberOverflow` goes back
//! on the bus (except for overflow events, which would loop). A panicking
//! `on_event` is caught and reported as `SubscriberPanicked`; the lane keeps going.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::panic_message;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct Lane {
    sub: Arc<dyn Subscribe>,
    tx: mpsc::Sender<Arc<Event>>,
    worker: JoinHandle<()>,
}

impl Lane {
    fn spawn(sub: Arc<dyn Subscribe>, reports: Bus) -> Self {
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
        let worker = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let delivery = std::panic::AssertUnwindSafe(sub.on_event(&ev));
                    if let Err(payload) = delivery.catch_unwind().await {
                        reports.publish(Event::subscriber_panicked(
                            sub.name(),
                            panic_message(payload.as_ref()),
                        ));
                    }
                }
            })
        };
        Self { sub, tx, worker }
    }

    /// `Err` carries the overflow reason.
    fn offer(&self, ev: &Arc<Event>) -> Result<(), &'static str> {
        if !self.sub.wants(ev.kind) {
            return Ok(());
        }
        self.tx.try_send(Arc::clone(ev)).map_err(|e| match e {
            TrySendError::Full(_) => "full",
            TrySendError::Closed(_) => "closed",
        })
    }
}

/// One lane per subscriber.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    reports: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber, so it needs a tokio runtime.
    /// Overflow and panic reports are published on `reports`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, reports: Bus) -> Self {
        let lanes = subs
            .into_iter()
            .map(|sub| Lane::spawn(sub, reports.clone()))
            .collect();
        Self { lanes, reports }
    }

    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        for lane in &self.lanes {
            if let Err(reason) = lane.offer(&shared) {
                if event.kind != EventKind::SubscriberOverflow {
                    self.reports
                        .publish(Event::subscriber_overflow(lane.sub.name(), reason));
                }
            }
        }
    }

    /// Closes every lane and waits for the workers to drain.
    pub async fn shutdown(self) {
        let workers: Vec<_> = self
            .lanes
            .into_iter()
            .map(|Lane { tx, worker, .. }| {
                drop(tx);
                worker
            })
            .collect();
        futures::future::join_all(workers).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Kinds {
        seen: Mutex<Vec<EventKind>>,
        only_instances: bool,
    }

    #[async_trait::async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.kind);
        }
        fn wants(&self, kind: EventKind) -> bool {
            !self.only_instances || kind.is_instance()
        }
        fn name(&self) -> &'static str {
            "kinds"
        }
    }

    struct Explodes;

    #[async_trait::async_trait]
    impl Subscribe for Explodes {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber exploded");
        }
        fn name(&self) -> &'static str {
            "explodes"
        }
    }

    struct Tiny;

    #[async_trait::async_trait]
    impl Subscribe for Tiny {
        async fn on_event(&self, _event: &Event) {
            std::future::pending::<()>().await;
        }
        fn name(&self) -> &'static str {
            "tiny"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_filter_is_applied_per_lane() {
        let all = Arc::new(Kinds::default());
        let filtered = Arc::new(Kinds {
            only_instances: true,
            ..Kinds::default()
        });
        let subs: Vec<Arc<dyn Subscribe>> = vec![all.clone(), filtered.clone()];
        let set = SubscriberSet::new(subs, Bus::new(16));

        set.emit(&Event::new(EventKind::CountsChanged));
        set.emit(&Event::for_instance(EventKind::InstanceStarted, "t", 1));
        set.shutdown().await;

        assert_eq!(all.seen.lock().unwrap().len(), 2);
        assert_eq!(*filtered.seen.lock().unwrap(), vec![EventKind::InstanceStarted]);
    }

    #[tokio::test]
    async fn test_panic_is_reported_on_bus() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Explodes)];
        let set = SubscriberSet::new(subs, bus);

        set.emit(&Event::new(EventKind::HostDestroyed));
        set.shutdown().await;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.task.as_deref(), Some("explodes"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber exploded"));
    }

    #[tokio::test]
    async fn test_full_lane_reports_overflow() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Tiny)];
        let set = SubscriberSet::new(subs, bus);

        // worker holds the first, queue holds the second, the rest overflow
        for _ in 0..4 {
            set.emit(&Event::new(EventKind::CountsChanged));
            tokio::task::yield_now().await;
        }
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.reason.as_deref(), Some("full"));
    }
}
