//! # Scheduler: active and queued instances of one task or group.
//!
//! ```text
//! schedule(inst) ─► queued.push_back ─► flush()
//!                                         │ 1. forget finished entries
//!                                         │ 2. BufferPolicy::schedule(&mut Slots)
//!                                         │ 3. start newly admitted entries
//!                                         ▼
//!                       (unlocked) cancel dropped, launch admitted, publish counts
//!
//! instance settles ─► finalizer ─► counts updated ─► request_flush()
//!                                                     (coalesced on the `actions` queue)
//! ```
//!
//! ## Rules
//! - `active` and `queued` are only changed inside `flush` and `cancel_all`, under
//!   the scheduler lock.
//! - After a pass `active.len()` never exceeds the limit (a restarted instance
//!   may still be unwinding outside of `active`).
//! - Lock order: scheduler → task record → instance. Cancels and launches run
//!   after the scheduler lock is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::events::Bus;
use crate::host::RunLoop;
use crate::instance::InstanceHandle;
use crate::policies::{BufferPolicy, Slots};
use crate::scheduler::{TaskRecord, publish_counts};

/// One scheduled instance and the task it was performed on.
pub(crate) struct Entry {
    pub(crate) instance: InstanceHandle,
    pub(crate) owner: Arc<TaskRecord>,
    admitted: bool,
}

#[cfg(test)]
impl Entry {
    pub(crate) fn detached() -> Self {
        use crate::{TaskError, TaskInstance};

        let inst = TaskInstance::create(|_ctx| async { Ok::<_, TaskError>(()) });
        Self {
            instance: inst.handle().clone(),
            owner: TaskRecord::new(std::sync::Arc::from("detached"), None),
            admitted: false,
        }
    }
}

#[derive(Default)]
struct Sequences {
    active: Vec<Entry>,
    queued: VecDeque<Entry>,
}

pub(crate) struct Scheduler {
    policy: Arc<dyn BufferPolicy>,
    max: Option<usize>,
    run_loop: RunLoop,
    bus: Bus,
    seq: Mutex<Sequences>,
    flush_pending: AtomicBool,
    this: Weak<Scheduler>,
}

impl Scheduler {
    pub(crate) fn new(
        policy: Arc<dyn BufferPolicy>,
        max: Option<usize>,
        run_loop: RunLoop,
        bus: Bus,
    ) -> Arc<Self> {
        let max = max.or_else(|| policy.default_max_concurrency());
        Arc::new_cyclic(|this| Self {
            policy,
            max,
            run_loop,
            bus,
            seq: Mutex::new(Sequences::default()),
            flush_pending: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Sequences> {
        self.seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub(crate) fn max_concurrency(&self) -> Option<usize> {
        self.max
    }

    /// Queues `instance` for `owner` and reconciles right away.
    pub(crate) fn schedule(&self, instance: InstanceHandle, owner: Arc<TaskRecord>) {
        owner.on_performed(&instance);

        let record = Arc::clone(&owner);
        let this = self.this.clone();
        instance.core().on_finalize(Box::new(move |settled: &InstanceHandle| {
            record.on_settled(settled);
            if let Some(scheduler) = this.upgrade() {
                scheduler.request_flush();
            }
        }));

        self.lock().queued.push_back(Entry {
            instance,
            owner,
            admitted: false,
        });
        self.flush();
    }

    /// Coalesces reconciliation requests into one pass on the `actions` queue.
    pub(crate) fn request_flush(&self) {
        if self.flush_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.this.clone();
        self.run_loop.schedule_actions(move || {
            if let Some(scheduler) = this.upgrade() {
                scheduler.flush_pending.store(false, Ordering::Release);
                scheduler.flush();
            }
        });
    }

    /// One reconciliation pass.
    pub(crate) fn flush(&self) {
        let (admitted, dropped, owners) = {
            let mut seq = self.lock();
            let mut owners: Vec<Arc<TaskRecord>> = Vec::new();
            let mut live = |entry: &Entry| {
                owners.push(Arc::clone(&entry.owner));
                !entry.instance.is_finished()
            };

            let active: Vec<Entry> = std::mem::take(&mut seq.active)
                .into_iter()
                .filter(|e| live(e))
                .collect();
            let queued: VecDeque<Entry> = std::mem::take(&mut seq.queued)
                .into_iter()
                .filter(|e| live(e))
                .collect();

            let mut slots = Slots::new(active, queued, self.max);
            self.policy.schedule(&mut slots);
            let (mut active, queued, dropped) = slots.into_parts();

            let mut admitted = Vec::new();
            for entry in active.iter_mut().filter(|e| !e.admitted) {
                entry.admitted = true;
                if entry.owner.start(&entry.instance) {
                    admitted.push(entry.instance.clone());
                }
            }
            seq.active = active;
            seq.queued = queued;
            (admitted, dropped, owners)
        };

        for entry in &dropped {
            entry.instance.cancel(self.policy.drop_reason());
        }
        for instance in &admitted {
            instance.core().launch();
        }
        publish_counts(&self.bus, &owners);
    }

    /// Cancels every active then queued instance whose owner passes `filter`.
    ///
    /// Returns the number of instances canceled.
    pub(crate) fn cancel_all(&self, reason: &str, filter: &dyn Fn(&TaskRecord) -> bool) -> usize {
        let victims: Vec<Entry> = {
            let mut seq = self.lock();
            let mut victims = Vec::new();

            let (hit, keep): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut seq.active)
                .into_iter()
                .partition(|e| filter(&e.owner));
            victims.extend(hit);
            seq.active = keep;

            let (hit, keep): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut seq.queued)
                .into_iter()
                .partition(|e| filter(&e.owner));
            victims.extend(hit);
            seq.queued = keep.into();
            victims
        };

        let reason: Arc<str> = Arc::from(reason);
        for entry in &victims {
            entry.instance.cancel(Arc::clone(&reason));
        }
        publish_counts(&self.bus, victims.iter().map(|e| &e.owner));
        victims.len()
    }

    pub(crate) fn active_len(&self) -> usize {
        self.lock().active.len()
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy.name())
            .field("max", &self.max)
            .field("active", &self.active_len())
            .field("queued", &self.queued_len())
            .finish()
    }
}
