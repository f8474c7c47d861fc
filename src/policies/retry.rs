//! # Retry policies.
//!
//! A [`RetryPolicy`] intercepts the rejection of a re-armable suspension
//! ([`TaskContext::suspend_with`](crate::TaskContext::suspend_with)) before it is
//! thrown into the body. If the policy retries, the instance stays suspended: a
//! timer re-arms the same suspension later and the body never sees the failure.
//!
//! ```text
//! rejection ──► should_retry? ──no──► error thrown into the body
//!                    │yes
//!                    ▼
//!               retry(instance) ──► retry_after(delays[retry_count])
//!                                         │ timer
//!                                         ▼
//!                              factory() re-subscribed
//! ```
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use cotask::{DelayBackOff, ReasonMatcher};
//!
//! let policy = DelayBackOff::from_millis(&[10.0, 50.0])
//!     .unwrap()
//!     .with_reason(ReasonMatcher::message("timeout"));
//! assert_eq!(policy.delays(), &[Duration::from_millis(10), Duration::from_millis(50)]);
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, TaskError};
use crate::instance::InstanceHandle;
use crate::policies::jitter::JitterPolicy;

/// Decides whether a failure is retried and schedules the retry.
pub trait RetryPolicy: Send + Sync + 'static {
    /// Called with a rejection of a re-armable suspension.
    fn should_retry(&self, instance: &InstanceHandle, error: &TaskError) -> bool;

    /// Schedules the retry, normally through [`InstanceHandle::retry_after`].
    fn retry(&self, instance: &InstanceHandle);

    /// Drops any pending retry. Called when the instance is canceled or settles.
    fn reset(&self, instance: &InstanceHandle);
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _instance: &InstanceHandle, _error: &TaskError) -> bool {
        false
    }

    fn retry(&self, _instance: &InstanceHandle) {}

    fn reset(&self, _instance: &InstanceHandle) {}
}

/// Matches the errors a [`DelayBackOff`] retries.
#[derive(Clone)]
pub struct ReasonMatcher(Arc<dyn Fn(&TaskError) -> bool + Send + Sync>);

impl ReasonMatcher {
    /// Wrapped application error of type `E`.
    pub fn is<E: StdError + 'static>() -> Self {
        Self(Arc::new(|err: &TaskError| err.downcast_ref::<E>().is_some()))
    }

    /// Application error whose message is exactly `message`.
    pub fn message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self(Arc::new(move |err: &TaskError| match err {
            TaskError::Fail { error } => error.to_string() == message,
            _ => false,
        }))
    }

    /// Arbitrary predicate.
    pub fn when<F>(f: F) -> Self
    where
        F: Fn(&TaskError) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn matches(&self, error: &TaskError) -> bool {
        (self.0)(error)
    }
}

impl fmt::Debug for ReasonMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReasonMatcher(..)")
    }
}

/// Retries up to `delays.len()` times, waiting `delays[retry_count]` before each retry.
///
/// With no reason matchers every application error qualifies; otherwise the error
/// must match at least one matcher. Cancellation is never retried.
#[derive(Debug, Clone)]
pub struct DelayBackOff {
    delays: Vec<Duration>,
    reasons: Vec<ReasonMatcher>,
    jitter: JitterPolicy,
}

impl DelayBackOff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            reasons: Vec::new(),
            jitter: JitterPolicy::None,
        }
    }

    /// Delays given in milliseconds.
    ///
    /// Fails with [`ConfigError::InvalidDelay`] on a negative, non-finite or
    /// out-of-range entry.
    pub fn from_millis(delays: &[f64]) -> Result<Self, ConfigError> {
        let delays = delays
            .iter()
            .enumerate()
            .map(|(index, ms)| {
                Duration::try_from_secs_f64(ms / 1000.0)
                    .map_err(|_| ConfigError::InvalidDelay { index })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(delays))
    }

    /// `count` delays growing as `first × factor^n`, clamped to `max`.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use cotask::DelayBackOff;
    ///
    /// let p = DelayBackOff::exponential(Duration::from_millis(100), 2.0, Duration::from_millis(500), 4);
    /// assert_eq!(
    ///     p.delays(),
    ///     &[100, 200, 400, 500].map(Duration::from_millis),
    /// );
    /// ```
    pub fn exponential(first: Duration, factor: f64, max: Duration, count: usize) -> Self {
        let max_secs = max.as_secs_f64();
        let delays = (0..count)
            .map(|attempt| {
                let exp = attempt.min(i32::MAX as usize) as i32;
                let secs = first.as_secs_f64() * factor.powi(exp);
                if secs > max_secs {
                    max
                } else {
                    Duration::try_from_secs_f64(secs).unwrap_or(max)
                }
            })
            .collect();
        Self::new(delays)
    }

    /// Only retry errors matching `matcher` (or any other added matcher).
    pub fn with_reason(mut self, matcher: ReasonMatcher) -> Self {
        self.reasons.push(matcher);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    fn matches(&self, error: &TaskError) -> bool {
        self.reasons.is_empty() || self.reasons.iter().any(|m| m.matches(error))
    }
}

impl RetryPolicy for DelayBackOff {
    fn should_retry(&self, instance: &InstanceHandle, error: &TaskError) -> bool {
        !error.is_cancellation()
            && (instance.retry_count() as usize) < self.delays.len()
            && self.matches(error)
    }

    fn retry(&self, instance: &InstanceHandle) {
        if let Some(delay) = self.delays.get(instance.retry_count() as usize) {
            instance.retry_after(self.jitter.apply(*delay));
        }
    }

    fn reset(&self, instance: &InstanceHandle) {
        instance.clear_retry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yieldables;
    use crate::{Host, HostConfig, Task, TaskContext, TaskInstance};
    use std::sync::atomic::{AtomicU32, Ordering};
    use thiserror::Error;
    use tokio::time::Instant;

    #[derive(Debug, Error)]
    #[error("timed out")]
    struct TimedOut;

    fn handle() -> InstanceHandle {
        TaskInstance::create(|_ctx| async { Ok::<_, TaskError>(()) })
            .handle()
            .clone()
    }

    #[test]
    fn test_invalid_millis_rejected() {
        assert_eq!(
            DelayBackOff::from_millis(&[10.0, f64::NAN]).unwrap_err(),
            ConfigError::InvalidDelay { index: 1 }
        );
        assert!(DelayBackOff::from_millis(&[-1.0]).is_err());
        assert_eq!(
            DelayBackOff::from_millis(&[5.0, 1e300]).unwrap_err(),
            ConfigError::InvalidDelay { index: 1 }
        );
        assert!(DelayBackOff::from_millis(&[f64::INFINITY]).is_err());
    }

    #[test]
    fn test_exponential_is_clamped() {
        let p = DelayBackOff::exponential(Duration::from_secs(10), 2.0, Duration::from_secs(5), 2);
        assert_eq!(p.delays(), &[Duration::from_secs(5), Duration::from_secs(5)]);

        let flat = DelayBackOff::exponential(Duration::from_millis(500), 1.0, Duration::from_secs(30), 3);
        assert!(flat.delays().iter().all(|d| *d == Duration::from_millis(500)));
    }

    #[test]
    fn test_reason_matchers() {
        let h = handle();
        let by_type = DelayBackOff::new(vec![Duration::ZERO]).with_reason(ReasonMatcher::is::<TimedOut>());
        assert!(by_type.should_retry(&h, &TaskError::fail(TimedOut)));
        assert!(!by_type.should_retry(&h, &TaskError::msg("timed out")));

        let by_message = DelayBackOff::new(vec![Duration::ZERO]).with_reason(ReasonMatcher::message("timed out"));
        assert!(by_message.should_retry(&h, &TaskError::msg("timed out")));
        assert!(by_message.should_retry(&h, &TaskError::fail(TimedOut)));
        assert!(!by_message.should_retry(&h, &TaskError::canceled("timed out")));

        let any = DelayBackOff::new(vec![Duration::ZERO]);
        assert!(any.should_retry(&h, &TaskError::msg("whatever")));
        assert!(!NoRetry.should_retry(&h, &TaskError::msg("whatever")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_then_terminal() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counted = attempts.clone();
        let policy = Arc::new(
            DelayBackOff::from_millis(&[10.0, 50.0])
                .unwrap()
                .with_reason(ReasonMatcher::is::<TimedOut>()),
        );

        let host = Host::new(HostConfig::default());
        let task = Task::builder("fetch")
            .retry(policy)
            .build(&host, move |ctx: TaskContext, ()| {
                let attempts = attempts.clone();
                async move {
                    ctx.suspend_with(move || {
                        let attempts = attempts.clone();
                        yieldables::try_future(async move {
                            attempts.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(TaskError::fail(TimedOut))
                        })
                    })
                    .await
                }
            })
            .unwrap();

        let started = Instant::now();
        let inst = task.perform(());
        let err = inst.completion().await.unwrap_err();
        assert!(err.downcast_ref::<TimedOut>().is_some());
        assert_eq!(counted.load(Ordering::SeqCst), 3);
        assert_eq!(inst.retry_count(), 2);
        assert!(!inst.is_retrying());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(60) && elapsed < Duration::from_millis(70));
    }
}
