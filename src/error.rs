//! Error types used by task instances, schedulers and builders.
//!
//! This module defines two main error enums:
//!
//! - [`TaskError`]: the outcome of a failed or canceled task instance.
//! - [`ConfigError`]: invalid modifier/policy arguments, raised when a task,
//!   group or policy is constructed (never deferred into execution).
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging/metrics.
//! Use [`did_cancel`] (or [`TaskError::is_cancellation`]) in error handlers to tell
//! cancellation apart from application failures.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// # Errors produced by task instances.
///
/// `TaskError` is cheap to clone: every awaiter of an instance receives its own copy
/// of the same settled outcome.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The instance was canceled while suspended or before it started.
    ///
    /// Never an application-level failure.
    #[error("task canceled: {reason}")]
    Canceled {
        /// Human-readable cancellation reason.
        reason: Arc<str>,
    },

    /// Error raised by a task body or rejected by an awaited value.
    #[error("task failed: {error}")]
    Fail {
        /// The underlying application error.
        error: Arc<dyn StdError + Send + Sync>,
    },
}

/// Plain-message application error created by [`TaskError::msg`].
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

impl TaskError {
    /// Creates a cancellation error with the given reason.
    pub fn canceled(reason: impl Into<Arc<str>>) -> Self {
        TaskError::Canceled {
            reason: reason.into(),
        }
    }

    /// Wraps an application error.
    pub fn fail<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TaskError::Fail {
            error: Arc::new(error),
        }
    }

    /// Creates an application error from a plain message.
    ///
    /// # Example
    /// ```
    /// use cotask::TaskError;
    ///
    /// let err = TaskError::msg("boom");
    /// assert_eq!(err.as_message(), "error: boom");
    /// assert!(!err.is_cancellation());
    /// ```
    pub fn msg(message: impl Into<String>) -> Self {
        Self::fail(Message(message.into()))
    }

    /// Returns `true` for the cancellation kind.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled { .. })
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use cotask::TaskError;
    ///
    /// let err = TaskError::canceled("no longer needed");
    /// assert_eq!(err.as_label(), "task_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Canceled { .. } => "task_canceled",
            TaskError::Fail { .. } => "task_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Canceled { reason } => format!("canceled: {reason}"),
            TaskError::Fail { error } => format!("error: {error}"),
        }
    }

    /// Attempts to view the wrapped application error as a concrete type.
    ///
    /// Returns `None` for cancellations and for errors of another type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            TaskError::Fail { error } => error.downcast_ref::<E>(),
            TaskError::Canceled { .. } => None,
        }
    }

    /// Cancellation reason, if this is a cancellation.
    pub fn reason(&self) -> Option<&str> {
        match self {
            TaskError::Canceled { reason } => Some(reason),
            TaskError::Fail { .. } => None,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        TaskError::Fail {
            error: Arc::from(Box::<dyn StdError + Send + Sync>::from(error)),
        }
    }
}

/// Returns `true` if `error` is the cancellation kind.
///
/// Intended for error handlers that must ignore cancellation:
///
/// ```
/// use cotask::{did_cancel, TaskError};
///
/// assert!(did_cancel(&TaskError::canceled("restarted")));
/// assert!(!did_cancel(&TaskError::msg("network down")));
/// ```
pub fn did_cancel(error: &TaskError) -> bool {
    error.is_cancellation()
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// # Errors raised while configuring tasks, groups and policies.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_concurrency(0)` would never admit anything.
    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,

    /// Buffer policies are owned by the group; members cannot override them.
    #[error("task '{task}' belongs to a group and cannot set its own buffer policy")]
    PolicyOnGroupMember {
        /// Name of the offending task or group.
        task: String,
    },

    /// The run loop has no queue with this name.
    #[error("unknown run loop queue '{queue}'")]
    UnknownQueue {
        /// Requested queue name.
        queue: String,
    },

    /// A retry delay is negative or not a finite number.
    #[error("retry delay at index {index} is not a finite, non-negative number")]
    InvalidDelay {
        /// Position of the offending delay in the sequence.
        index: usize,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::ZeroConcurrency => "config_zero_concurrency",
            ConfigError::PolicyOnGroupMember { .. } => "config_policy_on_group_member",
            ConfigError::UnknownQueue { .. } => "config_unknown_queue",
            ConfigError::InvalidDelay { .. } => "config_invalid_delay",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("offline")]
    struct Offline;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(TaskError::canceled("x").as_label(), "task_canceled");
        assert_eq!(TaskError::msg("x").as_label(), "task_failed");
        assert_eq!(
            ConfigError::UnknownQueue { queue: "q".into() }.as_label(),
            "config_unknown_queue"
        );
    }

    #[test]
    fn test_downcast_finds_wrapped_error() {
        let err = TaskError::fail(Offline);
        assert!(err.downcast_ref::<Offline>().is_some());
        assert!(TaskError::msg("offline").downcast_ref::<Offline>().is_none());
        assert!(TaskError::canceled("x").downcast_ref::<Offline>().is_none());
    }

    #[test]
    fn test_did_cancel_only_matches_cancellation() {
        assert!(did_cancel(&TaskError::canceled("dropped")));
        assert!(!did_cancel(&TaskError::fail(Offline)));
        assert_eq!(TaskError::canceled("dropped").reason(), Some("dropped"));
    }

    #[test]
    fn test_from_anyhow_keeps_message() {
        let err: TaskError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.as_message(), "error: disk full");
    }
}
