use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::HostConfig;
use crate::events::Bus;
use crate::host::core::HostInner;
use crate::host::{Host, RunLoop};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Host`] with optional subscribers.
pub struct HostBuilder {
    cfg: HostConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl HostBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: HostConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive host events (instance lifecycle, retries, counts)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the host.
    ///
    /// With subscribers this must be called inside a tokio runtime: it spawns the
    /// listener that forwards bus events to the [`SubscriberSet`].
    pub fn build(self) -> Host {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let run_loop = RunLoop::new(self.cfg.queues.iter().cloned());

        if !self.subscribers.is_empty() {
            let set = SubscriberSet::new(self.subscribers, bus.clone());
            let mut rx = bus.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
                set.shutdown().await;
            });
        }

        Host::from_inner(HostInner {
            cfg: self.cfg,
            bus,
            run_loop,
            teardown: CancellationToken::new(),
            schedulers: Mutex::new(Vec::new()),
        })
    }
}
