//! # Buffer policies: what happens to instances beyond the concurrency limit.
//!
//! A scheduler keeps two FIFO sequences, `active` and `queued`. On every
//! reconciliation pass it hands them to its [`BufferPolicy`] as a [`Slots`] view;
//! the policy admits queued instances, drops queued ones, or cancels active ones.
//! Anything the policy removes is canceled by the scheduler with
//! [`BufferPolicy::drop_reason`] after the pass.
//!
//! | mode          | default limit | beyond the limit                          |
//! |---------------|---------------|-------------------------------------------|
//! | `Unbounded`   | none          | an explicit limit makes it wait in FIFO   |
//! | `Enqueue`     | 1             | waits in FIFO order                       |
//! | `Drop`        | 1             | canceled immediately, never starts        |
//! | `Restartable` | 1             | oldest active instance canceled           |
//! | `KeepLatest`  | 1             | only the most recent queued one waits     |

use std::collections::VecDeque;

use crate::scheduler::Entry;

/// Mutable view over a scheduler's sequences during one reconciliation pass.
pub struct Slots {
    active: Vec<Entry>,
    queued: VecDeque<Entry>,
    max: Option<usize>,
    dropped: Vec<Entry>,
}

impl Slots {
    pub(crate) fn new(active: Vec<Entry>, queued: VecDeque<Entry>, max: Option<usize>) -> Self {
        Self {
            active,
            queued,
            max,
            dropped: Vec::new(),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<Entry>, VecDeque<Entry>, Vec<Entry>) {
        (self.active, self.queued, self.dropped)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// `None` means unbounded.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.max
    }

    /// True if one more instance may become active.
    pub fn has_room(&self) -> bool {
        self.max.is_none_or(|max| self.active.len() < max)
    }

    /// True if more instances are active than the limit allows.
    pub fn over_limit(&self) -> bool {
        self.max.is_some_and(|max| self.active.len() > max)
    }

    /// Moves the oldest queued instance to the back of `active`.
    pub fn admit_next(&mut self) -> bool {
        match self.queued.pop_front() {
            Some(entry) => {
                self.active.push(entry);
                true
            }
            None => false,
        }
    }

    /// Removes the oldest queued instance; it is canceled after the pass.
    pub fn drop_next_queued(&mut self) -> bool {
        match self.queued.pop_front() {
            Some(entry) => {
                self.dropped.push(entry);
                true
            }
            None => false,
        }
    }

    /// Removes the oldest active instance; it is canceled after the pass.
    pub fn cancel_oldest_active(&mut self) -> bool {
        if self.active.is_empty() {
            return false;
        }
        self.dropped.push(self.active.remove(0));
        true
    }
}

/// Reconciliation strategy of a scheduler.
///
/// Implementations must be pure: they only rearrange [`Slots`].
pub trait BufferPolicy: Send + Sync + 'static {
    fn schedule(&self, slots: &mut Slots);

    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Cancellation reason given to instances the policy removes.
    fn drop_reason(&self) -> &'static str;

    /// Limit used when the task or group does not set `max_concurrency`.
    fn default_max_concurrency(&self) -> Option<usize> {
        Some(1)
    }
}

/// Built-in buffer policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Everything runs right away.
    #[default]
    Unbounded,
    /// Excess instances wait in FIFO order.
    Enqueue,
    /// Excess instances are canceled without starting.
    Drop,
    /// The oldest running instances are canceled to make room.
    Restartable,
    /// Running work finishes; only the latest queued instance is kept.
    KeepLatest,
}

impl BufferPolicy for BufferMode {
    fn schedule(&self, slots: &mut Slots) {
        match self {
            BufferMode::Unbounded | BufferMode::Enqueue => {
                while slots.has_room() && slots.admit_next() {}
            }
            BufferMode::Drop => {
                while slots.has_room() && slots.admit_next() {}
                while slots.drop_next_queued() {}
            }
            BufferMode::Restartable => {
                while slots.admit_next() {}
                while slots.over_limit() && slots.cancel_oldest_active() {}
            }
            BufferMode::KeepLatest => {
                while slots.has_room() && slots.admit_next() {}
                while slots.queued_len() > 1 && slots.drop_next_queued() {}
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BufferMode::Unbounded => "unbounded",
            BufferMode::Enqueue => "enqueue",
            BufferMode::Drop => "drop",
            BufferMode::Restartable => "restartable",
            BufferMode::KeepLatest => "keep_latest",
        }
    }

    fn drop_reason(&self) -> &'static str {
        match self {
            BufferMode::Unbounded | BufferMode::Enqueue => "it belongs to a task that was canceled",
            BufferMode::Drop => "it belongs to a 'drop' task that was already running",
            BufferMode::Restartable => "it belongs to a 'restartable' task that was performed again",
            BufferMode::KeepLatest => "it belongs to a 'keep_latest' task that was already running",
        }
    }

    fn default_max_concurrency(&self) -> Option<usize> {
        match self {
            BufferMode::Unbounded => None,
            _ => Some(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Entry;

    fn run(mode: BufferMode, max: Option<usize>, active: usize, queued: usize) -> (Vec<u64>, Vec<u64>, Vec<u64>) {
        let active: Vec<Entry> = (0..active).map(|_| Entry::detached()).collect();
        let queued: VecDeque<Entry> = (0..queued).map(|_| Entry::detached()).collect();
        let ids = |v: &[Entry]| v.iter().map(|e| e.instance.id()).collect::<Vec<_>>();
        let all: Vec<u64> = ids(&active)
            .into_iter()
            .chain(queued.iter().map(|e| e.instance.id()))
            .collect();

        let mut slots = Slots::new(active, queued, max);
        mode.schedule(&mut slots);
        let (a, q, d) = slots.into_parts();
        let rank = |v: Vec<u64>| {
            v.into_iter()
                .map(|id| all.iter().position(|x| *x == id).unwrap_or(usize::MAX) as u64)
                .collect::<Vec<_>>()
        };
        (
            rank(ids(&a)),
            rank(q.iter().map(|e| e.instance.id()).collect()),
            rank(ids(&d)),
        )
    }

    #[test]
    fn test_unbounded_admits_everything() {
        assert_eq!(run(BufferMode::Unbounded, None, 1, 3), (vec![0, 1, 2, 3], vec![], vec![]));
    }

    #[test]
    fn test_unbounded_honors_explicit_limit() {
        assert_eq!(run(BufferMode::Unbounded, Some(2), 0, 5), (vec![0, 1], vec![2, 3, 4], vec![]));
    }

    #[test]
    fn test_enqueue_keeps_fifo() {
        assert_eq!(run(BufferMode::Enqueue, Some(2), 1, 3), (vec![0, 1], vec![2, 3], vec![]));
    }

    #[test]
    fn test_drop_discards_excess() {
        assert_eq!(run(BufferMode::Drop, Some(1), 1, 2), (vec![0], vec![], vec![1, 2]));
        assert_eq!(run(BufferMode::Drop, Some(2), 0, 3), (vec![0, 1], vec![], vec![2]));
    }

    #[test]
    fn test_restartable_cancels_oldest() {
        assert_eq!(run(BufferMode::Restartable, Some(1), 1, 1), (vec![1], vec![], vec![0]));
        assert_eq!(run(BufferMode::Restartable, Some(2), 2, 1), (vec![1, 2], vec![], vec![0]));
    }

    #[test]
    fn test_keep_latest_keeps_newest_queued() {
        assert_eq!(run(BufferMode::KeepLatest, Some(1), 1, 3), (vec![0], vec![3], vec![1, 2]));
        assert_eq!(run(BufferMode::KeepLatest, Some(2), 1, 3), (vec![0, 1], vec![3], vec![2]));
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(BufferMode::Unbounded.default_max_concurrency(), None);
        assert_eq!(BufferMode::KeepLatest.default_max_concurrency(), Some(1));
    }
}
