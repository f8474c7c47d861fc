//! # Example: retry
//!
//! Demonstrates how a [`DelayBackOff`] turns failed suspensions into delayed
//! retries of the same step, without restarting the task body.
//!
//! The awaited request fails twice before succeeding.
//!
//! ## Flow
//! ```text
//! perform(())
//!   ├─► ctx.suspend_with(request) → Err("boom #1")
//!   ├─► should_retry? yes → retry_count=1, wait 100ms
//!   ├─► request re-armed → Err("boom #2")
//!   ├─► should_retry? yes → retry_count=2, wait ≈200ms
//!   ├─► request re-armed → Ok("payload")
//!   └─► instance succeeds
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example retry
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cotask::{
    DelayBackOff, Host, HostConfig, JitterPolicy, ReasonMatcher, Task, TaskContext, TaskError,
    yieldables,
};

static CALLS: AtomicU64 = AtomicU64::new(0);

async fn request() -> Result<String, TaskError> {
    let call = CALLS.fetch_add(1, Ordering::Relaxed) + 1;
    println!("[request] call {call}");
    tokio::time::sleep(Duration::from_millis(20)).await;
    if call <= 2 {
        println!("[request] simulated failure #{call}");
        return Err(TaskError::msg(format!("boom #{call}")));
    }
    Ok("payload".to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // 1. Host with default queues, no subscribers
    let host = Host::new(HostConfig::default());

    // 2. Exponential delays (100ms, 200ms, 400ms) with equal jitter, any "boom" error
    let backoff = DelayBackOff::exponential(
        Duration::from_millis(100),
        2.0,
        Duration::from_secs(2),
        3,
    )
    .with_jitter(JitterPolicy::Equal)
    .with_reason(ReasonMatcher::when(|e| e.as_message().contains("boom")));

    // 3. The body re-arms `request()` on every retry
    let fetch = Task::builder("fetch")
        .retry(Arc::new(backoff))
        .build(&host, |ctx: TaskContext, ()| async move {
            let body = ctx
                .suspend_with(|| yieldables::try_future(request()))
                .await?;
            println!("[fetch] got {body} after {} retries", ctx.instance().retry_count());
            Ok::<_, TaskError>(body)
        })?;

    // 4. Perform and wait
    let inst = fetch.perform(());
    let body = inst.clone().await?;
    println!("[main] done: {body} (retry_count={})", inst.retry_count());
    Ok(())
}
