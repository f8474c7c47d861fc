//! # Host configuration.
//!
//! Provides [`HostConfig`], the settings a [`Host`](crate::Host) is created with.
//!
//! Config is used in two ways:
//! 1. **Host creation**: `Host::new(config)` / `Host::builder(config)`
//! 2. **Task defaults**: tasks built without `.retry(..)` use [`HostConfig::default_retry`]
//!
//! ## Run loop queues
//! `queues` lists the named cooperative-scheduling turns in flush order. The
//! `actions` queue is required (scheduler reconciliation is coalesced on it) and is
//! inserted if missing.

use std::sync::Arc;

use crate::policies::{NoRetry, RetryPolicy};

/// Queue used for coalesced scheduler reconciliation.
pub(crate) const ACTIONS_QUEUE: &str = "actions";

/// Configuration for a task host.
///
/// ## Field semantics
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `queues`: Run loop queue names, flushed in this order
/// - `default_retry`: Retry policy for tasks that do not configure one
#[derive(Clone)]
pub struct HostConfig {
    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Named run loop queues in flush order.
    pub queues: Vec<String>,

    /// Retry policy applied to tasks built without an explicit one.
    pub default_retry: Arc<dyn RetryPolicy>,
}

impl HostConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Dedupes queue names and inserts `actions` (after `sync` when that comes first).
pub(crate) fn normalize_queues<I, S>(queues: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for q in queues {
        let q = q.into();
        if !out.contains(&q) {
            out.push(q);
        }
    }
    if !out.iter().any(|q| q == ACTIONS_QUEUE) {
        let at = usize::from(out.first().is_some_and(|q| q == "sync"));
        out.insert(at, ACTIONS_QUEUE.to_string());
    }
    out
}

impl Default for HostConfig {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `queues = [sync, actions, routerTransitions, render, afterRender, destroy]`
    /// - `default_retry = NoRetry`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            queues: [
                "sync",
                "actions",
                "routerTransitions",
                "render",
                "afterRender",
                "destroy",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            default_retry: Arc::new(NoRetry),
        }
    }
}

impl std::fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfig")
            .field("bus_capacity", &self.bus_capacity)
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_actions_queue() {
        let cfg = HostConfig::default();
        assert_eq!(normalize_queues(cfg.queues.clone()), cfg.queues);
    }

    #[test]
    fn test_actions_inserted_after_sync() {
        assert_eq!(
            normalize_queues(["sync", "render", "render"]),
            vec!["sync", "actions", "render"]
        );
        assert_eq!(normalize_queues(["render"]), vec!["actions", "render"]);
    }

    #[test]
    fn test_bus_capacity_clamped() {
        let cfg = HostConfig {
            bus_capacity: 0,
            ..HostConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
