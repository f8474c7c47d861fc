//! # Host: the owner tasks live on.
//!
//! A [`Host`] bundles what tasks need from their environment:
//! - an event [`Bus`] (fanned out to subscribers when built with some);
//! - a [`RunLoop`] for queue turns and coalesced reconciliation;
//! - a liveness signal: [`destroy`](Host::destroy) tears the host down.
//!
//! Destroying the host cancels every instance of every task and group built on
//! it, makes derived cancelation tokens report cancelation, and causes later
//! performs to yield instances that are canceled right away.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::HostConfig;
use crate::events::{Bus, Event, EventKind};
use crate::host::{CancelationSource, HostBuilder, RunLoop};
use crate::scheduler::Scheduler;

/// Cancellation reason given to instances when their host is destroyed.
pub(crate) const HOST_DESTROYED: &str = "the object it lives on was destroyed or unrendered";

pub(crate) struct HostInner {
    pub(crate) cfg: HostConfig,
    pub(crate) bus: Bus,
    pub(crate) run_loop: RunLoop,
    pub(crate) teardown: CancellationToken,
    pub(crate) schedulers: Mutex<Vec<Weak<Scheduler>>>,
}

/// Environment tasks are built on. Cheap to clone.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// Host without subscribers.
    pub fn new(cfg: HostConfig) -> Self {
        HostBuilder::new(cfg).build()
    }

    pub fn builder(cfg: HostConfig) -> HostBuilder {
        HostBuilder::new(cfg)
    }

    pub(crate) fn from_inner(inner: HostInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    pub fn run_loop(&self) -> &RunLoop {
        &self.inner.run_loop
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.teardown.is_cancelled()
    }

    /// Resolves once the host is destroyed.
    pub async fn destroyed(&self) {
        self.inner.teardown.cancelled().await;
    }

    /// Mints tokens that report cancelation once the host is destroyed.
    pub fn cancelation_source(&self) -> CancelationSource {
        let teardown = self.inner.teardown.clone();
        CancelationSource::new(move || teardown.is_cancelled())
    }

    /// Tears the host down. Idempotent.
    ///
    /// Every instance of every task and group built on this host is canceled.
    pub fn destroy(&self) {
        if self.inner.teardown.is_cancelled() {
            return;
        }
        self.inner.teardown.cancel();

        let schedulers: Vec<Arc<Scheduler>> = {
            let mut list = self
                .inner
                .schedulers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            list.retain(|s| s.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for scheduler in schedulers {
            scheduler.cancel_all(HOST_DESTROYED, &|_| true);
        }
        self.inner
            .bus
            .publish(Event::new(EventKind::HostDestroyed).with_reason(HOST_DESTROYED));
    }

    pub(crate) fn register(&self, scheduler: &Arc<Scheduler>) {
        let mut list = self
            .inner
            .schedulers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        list.retain(|s| s.strong_count() > 0);
        list.push(Arc::downgrade(scheduler));
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("destroyed", &self.is_destroyed())
            .field("run_loop", &self.inner.run_loop)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_published() {
        let host = Host::new(HostConfig::default());
        let mut rx = host.subscribe();
        let token = host.cancelation_source().token();
        assert!(!token.is_cancelation_requested());

        host.destroy();
        host.destroy();
        assert!(host.is_destroyed());
        assert!(token.is_cancelation_requested());
        host.destroyed().await;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::HostDestroyed);
        assert!(rx.try_recv().is_err());
    }
}
