//! # Run loop: named, batched cooperative turns.
//!
//! Jobs are scheduled onto named queues. A flush runs the queues in their
//! configured order; after each queue's batch it starts over from the first
//! non-empty queue, so work scheduled from a later queue into an earlier one runs
//! before the loop moves on.
//!
//! Scheduling from inside a tokio runtime starts an *autorun*: one spawned flush
//! that covers every job scheduled before it runs. Many schedules in one tick
//! therefore yield one flush.
//!
//! ```text
//! schedule("render", job) ─► [sync][actions][render][...] ─► autorun flush
//!                                 ▲            │
//!                                 └── restart ─┘ (after each batch)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{ACTIONS_QUEUE, normalize_queues};
use crate::error::ConfigError;

type Job = Box<dyn FnOnce() + Send>;

struct Inner {
    names: Vec<String>,
    queues: Mutex<Vec<Vec<Job>>>,
    autorun: AtomicBool,
}

/// Cooperative scheduler with named queues. Cheap to clone.
#[derive(Clone)]
pub struct RunLoop {
    inner: Arc<Inner>,
}

impl RunLoop {
    /// Creates a loop with the given queues, flushed in this order.
    ///
    /// Duplicate names are ignored; the `actions` queue is added if missing.
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = normalize_queues(queues);
        let queues = names.iter().map(|_| Vec::new()).collect();
        Self {
            inner: Arc::new(Inner {
                names,
                queues: Mutex::new(queues),
                autorun: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<Job>>> {
        self.inner.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue names in flush order.
    pub fn queues(&self) -> &[String] {
        &self.inner.names
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.inner.names.iter().position(|q| q == name)
    }

    /// Schedules `job` on `queue` and makes sure a flush is coming.
    pub fn schedule<F>(&self, queue: &str, job: F) -> Result<(), ConfigError>
    where
        F: FnOnce() + Send + 'static,
    {
        let at = self.position(queue).ok_or_else(|| ConfigError::UnknownQueue {
            queue: queue.to_string(),
        })?;
        self.push(at, Box::new(job));
        Ok(())
    }

    /// Schedules on the always-present `actions` queue.
    pub(crate) fn schedule_actions<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(at) = self.position(ACTIONS_QUEUE) {
            self.push(at, Box::new(job));
        }
    }

    fn push(&self, at: usize, job: Job) {
        if let Some(queue) = self.lock().get_mut(at) {
            queue.push(job);
        }
        self.ensure_autorun();
    }

    fn ensure_autorun(&self) {
        if self.inner.autorun.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let run_loop = self.clone();
                rt.spawn(async move { run_loop.flush() });
            }
            Err(_) => self.inner.autorun.store(false, Ordering::Release),
        }
    }

    /// Number of jobs waiting for a flush.
    pub fn pending(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    /// Runs every pending job now, including jobs scheduled while flushing.
    pub fn flush(&self) {
        loop {
            let batch = {
                let mut queues = self.lock();
                match queues.iter_mut().find(|q| !q.is_empty()) {
                    Some(queue) => std::mem::take(queue),
                    None => {
                        self.inner.autorun.store(false, Ordering::Release);
                        return;
                    }
                }
            };
            for job in batch {
                job();
            }
        }
    }
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("queues", &self.inner.names)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_queue_rejected() {
        let rl = RunLoop::new(["sync", "render"]);
        assert_eq!(rl.queues(), &["sync", "actions", "render"]);
        assert_eq!(
            rl.schedule("paint", || {}),
            Err(ConfigError::UnknownQueue {
                queue: "paint".into()
            })
        );
    }

    #[test]
    fn test_flush_runs_queues_in_order() {
        let rl = RunLoop::new(["sync", "render", "after"]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str| {
            let log = Arc::clone(&log);
            move || log.lock().unwrap().push(tag)
        };
        rl.schedule("after", push("after")).unwrap();
        rl.schedule("render", push("render")).unwrap();
        {
            let again = rl.clone();
            let sync_job = push("sync-from-render");
            rl.schedule("render", move || again.schedule("sync", sync_job).unwrap())
                .unwrap();
        }
        rl.schedule("sync", push("sync")).unwrap();
        assert_eq!(rl.pending(), 4);

        rl.flush();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["sync", "render", "sync-from-render", "after"]
        );
        assert_eq!(rl.pending(), 0);
    }

    #[tokio::test]
    async fn test_autorun_coalesces() {
        let rl = RunLoop::new(["render"]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for i in 0..3 {
            let tx = tx.clone();
            rl.schedule("render", move || {
                let _ = tx.send(i);
            })
            .unwrap();
        }
        for expected in 0..3 {
            assert_eq!(rx.recv().await, Some(expected));
        }
        assert_eq!(rl.pending(), 0);
    }
}
