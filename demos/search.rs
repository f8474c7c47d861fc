//! # Example: search
//!
//! A type-ahead search built on a `restartable` task: every keystroke performs the
//! task again, which cancels the previous, still-running search.
//!
//! Events are printed by the built-in [`LogWriter`].
//!
//! ## Flow
//! ```text
//! perform("r")    ── running ──┐
//! perform("ru")   ── cancels "r", running ──┐
//! perform("rus")  ── cancels "ru", running ──┐
//! perform("rust") ── cancels "rus", running ─┴─► debounce ─► lookup ─► Succeeded
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example search --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use cotask::{
    Host, HostConfig, LogWriter, Subscribe, Task, TaskContext, TaskError, TaskState, did_cancel,
    yieldables,
};

const WORDS: &[&str] = &["rust", "rustc", "rustup", "ruby", "tokio", "trust"];

async fn lookup(query: String) -> Vec<String> {
    tokio::time::sleep(Duration::from_millis(40)).await;
    WORDS
        .iter()
        .filter(|w| w.starts_with(&query))
        .map(|w| w.to_string())
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let host = Host::builder(HostConfig::default())
        .with_subscribers(subs)
        .build();

    let search = Task::builder("search")
        .restartable()
        .evented()
        .build(&host, |ctx: TaskContext, query: String| async move {
            // Debounce: a newer keystroke cancels us while we wait here.
            ctx.suspend(yieldables::timeout(Duration::from_millis(100))).await?;
            let hits = ctx.suspend(yieldables::future(lookup(query))).await?;
            Ok::<_, TaskError>(hits)
        })?;

    let mut last = None;
    for query in ["r", "ru", "rus", "rust"] {
        last = Some(search.perform(query.to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        println!("[main] typed {query:?}: running={}", search.num_running());
    }

    if let Some(inst) = last {
        println!("[main] results: {:?}", inst.await?);
    }
    if let Some(prev) = search.last_canceled() {
        let err = prev.completion().await.err();
        println!("[main] previous search canceled: {}", err.as_ref().is_some_and(did_cancel));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    host.destroy();
    Ok(())
}
