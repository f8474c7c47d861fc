//! Buffer and retry policies.
//!
//! This module groups the knobs that control **which** instances of a task run
//! and **whether** a failed suspension is retried.
//!
//! ## Contents
//! - [`BufferPolicy`] / [`BufferMode`] reconciliation of active and queued instances
//! - [`Slots`] the view a buffer policy rearranges
//! - [`RetryPolicy`] / [`DelayBackOff`] / [`NoRetry`] retry of rejected suspensions
//! - [`ReasonMatcher`] which errors a `DelayBackOff` retries
//! - [`JitterPolicy`] randomization of retry delays
//!
//! ## Defaults
//! - Tasks are `BufferMode::Unbounded` unless a modifier says otherwise.
//! - `max_concurrency` alone implies `BufferMode::Enqueue`.
//! - Retry defaults to [`HostConfig::default_retry`](crate::HostConfig::default_retry) (`NoRetry`).

mod buffer;
mod jitter;
mod retry;

pub use buffer::{BufferMode, BufferPolicy, Slots};
pub use jitter::JitterPolicy;
pub use retry::{DelayBackOff, NoRetry, ReasonMatcher, RetryPolicy};
