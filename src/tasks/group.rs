//! # Task groups: one scheduler shared by several tasks.
//!
//! Members of a group compete for the group's concurrency slots under the group's
//! buffer policy. A group's counts are the sums over its member tasks and nested
//! groups; a nested group schedules through its parent.

use std::fmt;
use std::sync::Arc;

use crate::scheduler::{GroupRecord, Scheduler};
use crate::tasks::{TaskGroupBuilder, TaskState};

/// Handle to a group. Cheap to clone.
#[derive(Clone)]
pub struct TaskGroup {
    record: Arc<GroupRecord>,
    scheduler: Arc<Scheduler>,
}

impl TaskGroup {
    pub fn builder(name: impl Into<Arc<str>>) -> TaskGroupBuilder {
        TaskGroupBuilder::new(name)
    }

    pub(crate) fn from_parts(record: Arc<GroupRecord>, scheduler: Arc<Scheduler>) -> Self {
        Self { record, scheduler }
    }

    pub(crate) fn record(&self) -> &Arc<GroupRecord> {
        &self.record
    }

    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn policy_name(&self) -> &'static str {
        self.scheduler.policy_name()
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.scheduler.max_concurrency()
    }

    /// Cancels every instance of every task in this group and its sub-groups.
    ///
    /// Returns how many instances were canceled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        self.scheduler
            .cancel_all(reason, &|owner| self.record.contains(owner))
    }
}

impl TaskState for TaskGroup {
    fn num_running(&self) -> usize {
        self.record.num_running()
    }

    fn num_queued(&self) -> usize {
        self.record.num_queued()
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("name", self.record.name())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Host, HostConfig, Task, TaskContext, TaskError, TaskStatus, yieldables};
    use std::time::Duration;

    fn member(host: &Host, group: &TaskGroup, name: &str) -> Task<(), ()> {
        Task::builder(name.to_string())
            .group(group)
            .build(host, |ctx: TaskContext, ()| async move {
                ctx.suspend(yieldables::timeout(Duration::from_millis(10))).await
            })
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_members_share_slots() {
        let host = Host::new(HostConfig::default());
        let group = TaskGroup::builder("g").enqueue().build(&host).unwrap();
        let (a, b) = (member(&host, &group, "a"), member(&host, &group, "b"));

        let ia = a.perform(());
        let ib = b.perform(());
        assert!(ia.is_running());
        assert!(!ib.has_started());
        assert_eq!((group.num_running(), group.num_queued()), (1, 1));
        assert_eq!(group.state(), TaskStatus::Running);

        ia.clone().await.unwrap();
        ib.clone().await.unwrap();
        assert!(group.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_counts_and_cancel() {
        let host = Host::new(HostConfig::default());
        let root = TaskGroup::builder("root").max_concurrency(4).build(&host).unwrap();
        let inner = TaskGroup::builder("inner").parent(&root).build(&host).unwrap();
        let (a, b) = (member(&host, &root, "a"), member(&host, &inner, "b"));

        let ia = a.perform(());
        let ib = b.perform(());
        assert_eq!(inner.num_running(), 1);
        assert_eq!(root.num_running(), 2);
        assert_eq!(inner.policy_name(), "enqueue");

        assert_eq!(inner.cancel_all("inner only"), 1);
        assert!(ib.completion().await.unwrap_err().is_cancellation());
        assert!(ia.is_running());
        assert_eq!(root.cancel_all("all"), 1);
        assert!(ia.completion().await.is_err());
        assert!(root.is_idle());
    }
}
