//! The [`Subscribe`] trait.
//!
//! A subscriber sees host events after they leave the bus. Each one gets its own
//! bounded queue and worker inside the [`SubscriberSet`](crate::SubscriberSet);
//! a subscriber that falls behind loses events (reported as `SubscriberOverflow`)
//! and never slows down settling or reconciliation.
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use cotask::{Event, EventKind, Subscribe};
//!
//! #[derive(Default)]
//! struct CancelCounter(AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for CancelCounter {
//!     async fn on_event(&self, _ev: &Event) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn wants(&self, kind: EventKind) -> bool {
//!         kind == EventKind::InstanceCanceled
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "cancel-counter"
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Filter applied before queueing. Rejected kinds cost nothing and never
    /// count toward overflow.
    fn wants(&self, _kind: EventKind) -> bool {
        true
    }

    /// Used in overflow and panic reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn queue_capacity(&self) -> usize {
        256
    }
}
