//! # Lifecycle and bookkeeping events.
//!
//! Three families of [`EventKind`]:
//! - **instance**: `InstanceStarted`, `InstanceSucceeded`, `InstanceErrored`,
//!   `InstanceCanceled` and `RetryScheduled`. Published only by tasks built with
//!   [`TaskBuilder::evented`](crate::TaskBuilder::evented).
//! - **counters**: `CountsChanged`, published after every reconciliation pass
//!   (and `cancel_all`) for each task and group that had instances in it. The
//!   numbers are a snapshot and may equal the previous ones.
//! - **host**: `HostDestroyed`, `SubscriberOverflow`, `SubscriberPanicked`.
//!
//! `seq` is process-wide and strictly increasing, so a consumer that sees events
//! from several receivers can put them back in publish order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use cotask::{Event, EventKind};
//!
//! let ev = Event::for_instance(EventKind::RetryScheduled, "load-feed", 7)
//!     .with_attempt(1)
//!     .with_delay(Duration::from_millis(10));
//!
//! assert_eq!(ev.kind.as_str(), "retry-scheduled");
//! assert_eq!(ev.instance, Some(7));
//! assert_eq!(ev.delay, Some(Duration::from_millis(10)));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// What happened.
///
/// Field usage per kind:
///
/// | kind                 | task            | instance | reason        | extra               |
/// |----------------------|-----------------|----------|---------------|---------------------|
/// | `InstanceStarted`    | task name       | id       |               |                     |
/// | `InstanceSucceeded`  | task name       | id       |               |                     |
/// | `InstanceErrored`    | task name       | id       | error message |                     |
/// | `InstanceCanceled`   | task name       | id       | cancel reason |                     |
/// | `RetryScheduled`     | task name       | id       |               | `attempt`, `delay`  |
/// | `CountsChanged`      | task/group name |          |               | `running`, `queued` |
/// | `HostDestroyed`      |                 |          | cancel reason |                     |
/// | `SubscriberOverflow` | subscriber      |          | full / closed |                     |
/// | `SubscriberPanicked` | subscriber      |          | panic payload |                     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InstanceStarted,
    InstanceSucceeded,
    InstanceErrored,
    InstanceCanceled,
    /// A failed suspension will be re-armed after `delay`.
    RetryScheduled,
    CountsChanged,
    /// Every task on the host was canceled; the host accepts no more work.
    HostDestroyed,
    /// A subscriber queue rejected an event.
    SubscriberOverflow,
    SubscriberPanicked,
}

impl EventKind {
    /// Stable kebab-case label, used by log output.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::InstanceStarted => "started",
            EventKind::InstanceSucceeded => "succeeded",
            EventKind::InstanceErrored => "errored",
            EventKind::InstanceCanceled => "canceled",
            EventKind::RetryScheduled => "retry-scheduled",
            EventKind::CountsChanged => "counts",
            EventKind::HostDestroyed => "host-destroyed",
            EventKind::SubscriberOverflow => "subscriber-overflow",
            EventKind::SubscriberPanicked => "subscriber-panicked",
        }
    }

    /// True for kinds that describe a single instance.
    pub fn is_instance(self) -> bool {
        matches!(
            self,
            EventKind::InstanceStarted
                | EventKind::InstanceSucceeded
                | EventKind::InstanceErrored
                | EventKind::InstanceCanceled
                | EventKind::RetryScheduled
        )
    }
}

/// One published event. Unused fields stay `None`; see [`EventKind`] for which
/// kinds fill what.
#[derive(Clone, Debug)]
pub struct Event {
    pub seq: u64,
    pub at: SystemTime,
    pub kind: EventKind,
    pub task: Option<Arc<str>>,
    pub instance: Option<u64>,
    pub reason: Option<Arc<str>>,
    pub attempt: Option<u32>,
    pub delay: Option<Duration>,
    pub running: Option<usize>,
    pub queued: Option<usize>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            instance: None,
            reason: None,
            attempt: None,
            delay: None,
            running: None,
            queued: None,
        }
    }

    /// Event about instance `id` of task `task`.
    pub fn for_instance(kind: EventKind, task: impl Into<Arc<str>>, id: u64) -> Self {
        Self::new(kind).with_task(task).with_instance(id)
    }

    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Self::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Self::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    pub fn with_task(self, task: impl Into<Arc<str>>) -> Self {
        Self { task: Some(task.into()), ..self }
    }

    pub fn with_instance(self, id: u64) -> Self {
        Self { instance: Some(id), ..self }
    }

    pub fn with_reason(self, reason: impl Into<Arc<str>>) -> Self {
        Self { reason: Some(reason.into()), ..self }
    }

    pub fn with_attempt(self, attempt: u32) -> Self {
        Self { attempt: Some(attempt), ..self }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay: Some(delay), ..self }
    }

    /// Snapshot of a record's counters.
    pub fn with_counts(self, running: usize, queued: usize) -> Self {
        Self {
            running: Some(running),
            queued: Some(queued),
            ..self
        }
    }

    pub fn is_instance_event(&self) -> bool {
        self.kind.is_instance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_orders_events() {
        let first = Event::new(EventKind::HostDestroyed);
        let second = Event::for_instance(EventKind::InstanceStarted, "t", 1);
        assert!(second.seq > first.seq);
    }

    #[test]
    fn test_counts_event_is_not_instance_scoped() {
        let ev = Event::new(EventKind::CountsChanged)
            .with_task("save")
            .with_counts(1, 2);
        assert_eq!((ev.running, ev.queued), (Some(1), Some(2)));
        assert!(!ev.is_instance_event());
        assert!(Event::for_instance(EventKind::InstanceCanceled, "save", 3).is_instance_event());
    }

    #[test]
    fn test_overflow_names_subscriber() {
        let ev = Event::subscriber_overflow("audit", "full");
        assert_eq!(ev.task.as_deref(), Some("audit"));
        assert_eq!(ev.reason.as_deref(), Some("full"));
        assert_eq!(ev.kind.as_str(), "subscriber-overflow");
    }
}
