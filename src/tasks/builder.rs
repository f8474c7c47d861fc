//! Fluent builders for tasks and groups.
//!
//! Both builders share the buffer modifiers (`enqueue`, `drop_excess`,
//! `restartable`, `keep_latest`, `max_concurrency`, `with_policy`). Arguments are
//! validated in `build`, never deferred to the first perform.

use std::future::Future;
use std::sync::Arc;

use crate::error::{ConfigError, TaskError};
use crate::host::Host;
use crate::instance::TaskContext;
use crate::policies::{BufferMode, BufferPolicy, RetryPolicy};
use crate::scheduler::{GroupRecord, Scheduler, TaskRecord};
use crate::tasks::{Task, TaskGroup};

/// Buffer settings shared by task and group builders.
#[derive(Clone, Default)]
struct Buffering {
    policy: Option<Arc<dyn BufferPolicy>>,
    max: Option<usize>,
}

impl Buffering {
    fn is_set(&self) -> bool {
        self.policy.is_some() || self.max.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.max {
            Some(0) => Err(ConfigError::ZeroConcurrency),
            _ => Ok(()),
        }
    }

    /// A limit without a policy means `enqueue`.
    fn scheduler(&self, host: &Host) -> Arc<Scheduler> {
        let policy = match (&self.policy, self.max) {
            (Some(policy), _) => Arc::clone(policy),
            (None, Some(_)) => Arc::new(BufferMode::Enqueue),
            (None, None) => Arc::new(BufferMode::Unbounded),
        };
        let scheduler = Scheduler::new(
            policy,
            self.max,
            host.run_loop().clone(),
            host.bus().clone(),
        );
        host.register(&scheduler);
        scheduler
    }
}

macro_rules! buffer_modifiers {
    () => {
        /// Excess instances wait in FIFO order.
        pub fn enqueue(self) -> Self {
            self.with_policy(BufferMode::Enqueue)
        }

        /// Excess instances are canceled without starting.
        pub fn drop_excess(self) -> Self {
            self.with_policy(BufferMode::Drop)
        }

        /// Performing again cancels the oldest running instance.
        pub fn restartable(self) -> Self {
            self.with_policy(BufferMode::Restartable)
        }

        /// Keeps running work and only the most recent queued instance.
        pub fn keep_latest(self) -> Self {
            self.with_policy(BufferMode::KeepLatest)
        }

        /// Custom buffer policy.
        pub fn with_policy(mut self, policy: impl BufferPolicy) -> Self {
            self.buffering.policy = Some(Arc::new(policy));
            self
        }

        /// Maximum number of running instances. `0` is rejected by `build`.
        pub fn max_concurrency(mut self, max: usize) -> Self {
            self.buffering.max = Some(max);
            self
        }
    };
}

/// Builder returned by [`Task::builder`].
#[derive(Clone)]
pub struct TaskBuilder {
    name: Arc<str>,
    buffering: Buffering,
    group: Option<TaskGroup>,
    retry: Option<Arc<dyn RetryPolicy>>,
    evented: bool,
}

impl TaskBuilder {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            buffering: Buffering::default(),
            group: None,
            retry: None,
            evented: false,
        }
    }

    buffer_modifiers!();

    /// Makes the task a member of `group`; the group's policy and limit apply.
    pub fn group(mut self, group: &TaskGroup) -> Self {
        self.group = Some(group.clone());
        self
    }

    /// Retry policy for rearmable suspensions; defaults to the host's.
    pub fn retry(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Publishes lifecycle events for every instance on the host bus.
    pub fn evented(mut self) -> Self {
        self.evented = true;
        self
    }

    /// Builds the task on `host` from a body closure.
    ///
    /// # Errors
    /// - [`ConfigError::ZeroConcurrency`] for `max_concurrency(0)`;
    /// - [`ConfigError::PolicyOnGroupMember`] when a group member sets a policy or limit.
    pub fn build<A, T, F, Fut>(self, host: &Host, f: F) -> Result<Task<A, T>, ConfigError>
    where
        A: Send + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(TaskContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.buffering.validate()?;
        let (scheduler, group) = match &self.group {
            Some(_) if self.buffering.is_set() => {
                return Err(ConfigError::PolicyOnGroupMember {
                    task: self.name.to_string(),
                });
            }
            Some(group) => (Arc::clone(group.scheduler()), Some(Arc::clone(group.record()))),
            None => (self.buffering.scheduler(host), None),
        };

        let retry = self
            .retry
            .unwrap_or_else(|| Arc::clone(&host.config().default_retry));
        let record = TaskRecord::new(self.name, group);
        Ok(Task::from_parts(
            record,
            scheduler,
            host.clone(),
            retry,
            self.evented,
            f,
        ))
    }
}

/// Builder returned by [`TaskGroup::builder`].
#[derive(Clone)]
pub struct TaskGroupBuilder {
    name: Arc<str>,
    buffering: Buffering,
    parent: Option<TaskGroup>,
}

impl TaskGroupBuilder {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            buffering: Buffering::default(),
            parent: None,
        }
    }

    buffer_modifiers!();

    /// Nests this group in `parent`; the parent's policy and limit apply.
    pub fn parent(mut self, parent: &TaskGroup) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Builds the group on `host`.
    ///
    /// # Errors
    /// Same rules as [`TaskBuilder::build`]: a nested group cannot set its own policy.
    pub fn build(self, host: &Host) -> Result<TaskGroup, ConfigError> {
        self.buffering.validate()?;
        match self.parent {
            Some(_) if self.buffering.is_set() => Err(ConfigError::PolicyOnGroupMember {
                task: self.name.to_string(),
            }),
            Some(parent) => Ok(TaskGroup::from_parts(
                GroupRecord::new(self.name, Some(Arc::clone(parent.record()))),
                Arc::clone(parent.scheduler()),
            )),
            None => Ok(TaskGroup::from_parts(
                GroupRecord::new(self.name, None),
                self.buffering.scheduler(host),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostConfig;

    fn noop(host: &Host, builder: TaskBuilder) -> Result<Task<(), ()>, ConfigError> {
        builder.build(host, |_ctx: TaskContext, ()| async { Ok::<_, TaskError>(()) })
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let host = Host::new(HostConfig::default());
        let err = noop(&host, Task::builder("t").enqueue().max_concurrency(0)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroConcurrency);

        let err = TaskGroup::builder("g").max_concurrency(0).build(&host).unwrap_err();
        assert_eq!(err, ConfigError::ZeroConcurrency);
    }

    #[test]
    fn test_defaults_and_limit_without_policy() {
        let host = Host::new(HostConfig::default());
        let plain = noop(&host, Task::builder("plain")).unwrap();
        assert_eq!((plain.policy_name(), plain.max_concurrency()), ("unbounded", None));

        let limited = noop(&host, Task::builder("limited").max_concurrency(3)).unwrap();
        assert_eq!((limited.policy_name(), limited.max_concurrency()), ("enqueue", Some(3)));

        let dropping = noop(&host, Task::builder("drop").drop_excess()).unwrap();
        assert_eq!(dropping.max_concurrency(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_limit_caps_unbounded_policy() {
        use crate::{TaskState, yieldables};
        use std::time::Duration;

        let host = Host::new(HostConfig::default());
        let task = Task::builder("capped")
            .with_policy(BufferMode::Unbounded)
            .max_concurrency(2)
            .build(&host, |ctx: TaskContext, ()| async move {
                ctx.suspend(yieldables::timeout(Duration::from_millis(10))).await
            })
            .unwrap();

        let runs: Vec<_> = (0..5).map(|_| task.perform(())).collect();
        assert_eq!((task.num_running(), task.num_queued()), (2, 3));
        for run in runs {
            run.await.unwrap();
            assert!(task.num_running() <= 2);
        }
        assert!(task.is_idle());
    }

    #[test]
    fn test_group_members_cannot_set_policy() {
        let host = Host::new(HostConfig::default());
        let group = TaskGroup::builder("g").restartable().build(&host).unwrap();

        let err = noop(&host, Task::builder("t").group(&group).enqueue()).unwrap_err();
        assert_eq!(err, ConfigError::PolicyOnGroupMember { task: "t".into() });

        let nested = TaskGroup::builder("inner").parent(&group).keep_latest().build(&host);
        assert!(matches!(nested, Err(ConfigError::PolicyOnGroupMember { .. })));

        let member = noop(&host, Task::builder("m").group(&group)).unwrap();
        assert_eq!(member.policy_name(), "restartable");
    }
}
