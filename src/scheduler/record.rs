//! # Per-task and per-group bookkeeping.
//!
//! [`TaskRecord`] holds a task's counters and `last*` instances. [`GroupRecord`]
//! holds no counters of its own: its numbers are summed over member tasks and
//! sub-groups whenever they are read, so they can never drift from the members.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::events::{Bus, Event, EventKind};
use crate::instance::{InstanceHandle, InstanceState};

#[derive(Default)]
struct Counts {
    running: usize,
    queued: usize,
    performed: u64,
}

#[derive(Default)]
struct Last {
    performed: Option<InstanceHandle>,
    started: Option<InstanceHandle>,
    running: Option<InstanceHandle>,
    complete: Option<InstanceHandle>,
    successful: Option<InstanceHandle>,
    errored: Option<InstanceHandle>,
    canceled: Option<InstanceHandle>,
    incomplete: Option<InstanceHandle>,
}

/// Which `last*` instance to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LastKind {
    Performed,
    Started,
    Running,
    Complete,
    Successful,
    Errored,
    Canceled,
    Incomplete,
}

pub(crate) struct TaskRecord {
    name: Arc<str>,
    group: Option<Arc<GroupRecord>>,
    counts: Mutex<Counts>,
    last: Mutex<Last>,
}

impl TaskRecord {
    pub(crate) fn new(name: Arc<str>, group: Option<Arc<GroupRecord>>) -> Arc<Self> {
        let record = Arc::new(Self {
            name,
            group: group.clone(),
            counts: Mutex::new(Counts::default()),
            last: Mutex::new(Last::default()),
        });
        if let Some(group) = group {
            group.add_task(&record);
        }
        record
    }

    fn counts(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last(&self) -> MutexGuard<'_, Last> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn group(&self) -> Option<&Arc<GroupRecord>> {
        self.group.as_ref()
    }

    pub(crate) fn num_running(&self) -> usize {
        self.counts().running
    }

    pub(crate) fn num_queued(&self) -> usize {
        self.counts().queued
    }

    pub(crate) fn perform_count(&self) -> u64 {
        self.counts().performed
    }

    pub(crate) fn last_instance(&self, kind: LastKind) -> Option<InstanceHandle> {
        let last = self.last();
        let slot = match kind {
            LastKind::Performed => &last.performed,
            LastKind::Started => &last.started,
            LastKind::Running => &last.running,
            LastKind::Complete => &last.complete,
            LastKind::Successful => &last.successful,
            LastKind::Errored => &last.errored,
            LastKind::Canceled => &last.canceled,
            LastKind::Incomplete => &last.incomplete,
        };
        slot.clone()
    }

    pub(crate) fn on_performed(&self, instance: &InstanceHandle) {
        {
            let mut counts = self.counts();
            counts.queued += 1;
            counts.performed += 1;
        }
        self.last().performed = Some(instance.clone());
    }

    /// Starts `instance` and moves it from queued to running.
    ///
    /// The counter lock is held across the start so a concurrent settle cannot
    /// account for the instance before it was counted as running.
    pub(crate) fn start(&self, instance: &InstanceHandle) -> bool {
        {
            let mut counts = self.counts();
            if !instance.core().admit() {
                return false;
            }
            counts.queued = counts.queued.saturating_sub(1);
            counts.running += 1;
        }
        let mut last = self.last();
        last.started = Some(instance.clone());
        last.running = Some(instance.clone());
        true
    }

    pub(crate) fn on_settled(&self, instance: &InstanceHandle) {
        {
            let mut counts = self.counts();
            if instance.has_started() {
                counts.running = counts.running.saturating_sub(1);
            } else {
                counts.queued = counts.queued.saturating_sub(1);
            }
        }
        if !instance.has_started() {
            return;
        }

        let mut last = self.last();
        if last.running.as_ref() == Some(instance) {
            last.running = None;
        }
        last.complete = Some(instance.clone());
        match instance.state() {
            InstanceState::Succeeded => last.successful = Some(instance.clone()),
            InstanceState::Errored => {
                last.errored = Some(instance.clone());
                last.incomplete = Some(instance.clone());
            }
            InstanceState::Canceled => {
                last.canceled = Some(instance.clone());
                last.incomplete = Some(instance.clone());
            }
            InstanceState::NotStarted | InstanceState::Running => {}
        }
    }
}

pub(crate) struct GroupRecord {
    name: Arc<str>,
    parent: Option<Arc<GroupRecord>>,
    tasks: Mutex<Vec<Weak<TaskRecord>>>,
    groups: Mutex<Vec<Weak<GroupRecord>>>,
}

impl GroupRecord {
    pub(crate) fn new(name: Arc<str>, parent: Option<Arc<GroupRecord>>) -> Arc<Self> {
        let record = Arc::new(Self {
            name,
            parent: parent.clone(),
            tasks: Mutex::new(Vec::new()),
            groups: Mutex::new(Vec::new()),
        });
        if let Some(parent) = parent {
            parent
                .groups
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::downgrade(&record));
        }
        record
    }

    fn add_task(&self, task: &Arc<TaskRecord>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(task));
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn parent(&self) -> Option<&Arc<GroupRecord>> {
        self.parent.as_ref()
    }

    fn members(&self) -> (Vec<Arc<TaskRecord>>, Vec<Arc<GroupRecord>>) {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let groups = self
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        (tasks, groups)
    }

    pub(crate) fn num_running(&self) -> usize {
        let (tasks, groups) = self.members();
        tasks.iter().map(|t| t.num_running()).sum::<usize>()
            + groups.iter().map(|g| g.num_running()).sum::<usize>()
    }

    pub(crate) fn num_queued(&self) -> usize {
        let (tasks, groups) = self.members();
        tasks.iter().map(|t| t.num_queued()).sum::<usize>()
            + groups.iter().map(|g| g.num_queued()).sum::<usize>()
    }

    /// True if `task` belongs to this group or one of its sub-groups.
    pub(crate) fn contains(&self, task: &TaskRecord) -> bool {
        let mut group = task.group();
        while let Some(g) = group {
            if std::ptr::eq(Arc::as_ptr(g), self) {
                return true;
            }
            group = g.parent();
        }
        false
    }
}

/// Publishes `CountsChanged` once for every distinct task and each group on its chain.
pub(crate) fn publish_counts<'a, I>(bus: &Bus, owners: I)
where
    I: IntoIterator<Item = &'a Arc<TaskRecord>>,
{
    let mut visited: HashSet<usize> = HashSet::new();
    for task in owners {
        if !visited.insert(Arc::as_ptr(task) as usize) {
            continue;
        }
        bus.publish(
            Event::new(EventKind::CountsChanged)
                .with_task(Arc::clone(task.name()))
                .with_counts(task.num_running(), task.num_queued()),
        );
        let mut group = task.group();
        while let Some(g) = group {
            if !visited.insert(Arc::as_ptr(g) as usize) {
                break;
            }
            bus.publish(
                Event::new(EventKind::CountsChanged)
                    .with_task(Arc::clone(g.name()))
                    .with_counts(g.num_running(), g.num_queued()),
            );
            group = g.parent();
        }
    }
}
