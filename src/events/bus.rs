//! Host-wide event bus.
//!
//! Publishing happens inside settle and reconciliation, which are synchronous and
//! may hold scheduler locks, so [`Bus::publish`] is a plain `broadcast::send`:
//! never awaits, never fails. The ring buffer is shared by all receivers; one
//! that falls more than `capacity` events behind gets `RecvError::Lagged` and
//! resumes at the oldest retained event. Events published while nobody listens
//! are gone.

use tokio::sync::broadcast;

use super::event::Event;

#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    pub fn publish(&self, ev: Event) {
        // Err only means there is no receiver right now.
        let _ = self.tx.send(ev);
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_late_receiver_misses_earlier_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::HostDestroyed));
        let mut rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);

        bus.publish(Event::for_instance(EventKind::InstanceStarted, "t", 9));
        let ev = rx.recv().await.unwrap();
        assert_eq!((ev.kind, ev.instance), (EventKind::InstanceStarted, Some(9)));
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        for n in 0..5 {
            bus.publish(Event::new(EventKind::CountsChanged).with_counts(n, 0));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().running, Some(3));
    }
}
