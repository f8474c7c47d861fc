//! Derived state shared by [`Task`](crate::Task) and [`TaskGroup`](crate::TaskGroup).

/// Coarse state of a task or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Running,
    Queued,
    Idle,
}

impl TaskStatus {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Queued => "queued",
            TaskStatus::Idle => "idle",
        }
    }
}

/// Flags computed from the running/queued counters.
pub trait TaskState {
    fn num_running(&self) -> usize;

    fn num_queued(&self) -> usize;

    fn is_running(&self) -> bool {
        self.num_running() > 0
    }

    fn is_queued(&self) -> bool {
        self.num_queued() > 0
    }

    fn is_idle(&self) -> bool {
        !self.is_running() && !self.is_queued()
    }

    /// `Running` wins over `Queued`.
    fn state(&self) -> TaskStatus {
        if self.is_running() {
            TaskStatus::Running
        } else if self.is_queued() {
            TaskStatus::Queued
        } else {
            TaskStatus::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize, usize);

    impl TaskState for Fixed {
        fn num_running(&self) -> usize {
            self.0
        }
        fn num_queued(&self) -> usize {
            self.1
        }
    }

    #[test]
    fn test_running_wins() {
        assert_eq!(Fixed(1, 3).state(), TaskStatus::Running);
        assert_eq!(Fixed(0, 3).state(), TaskStatus::Queued);
        assert!(Fixed(0, 0).is_idle());
        assert_eq!(Fixed(0, 0).state().as_label(), "idle");
    }
}
