//! Reconciliation of task instances against a buffer policy.
//!
//! Every task owns a [`Scheduler`] unless it belongs to a group, in which case
//! it shares the group's. The scheduler keeps the instances, the
//! [`TaskRecord`]/[`GroupRecord`] keep the counters.

mod core;
mod record;

pub(crate) use self::core::{Entry, Scheduler};
pub(crate) use record::{GroupRecord, LastKind, TaskRecord, publish_counts};
