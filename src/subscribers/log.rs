//! Stdout subscriber for demos and debugging.
//!
//! ```text
//! [started] search#3
//! [retry-scheduled] search#3 attempt=1 delay=10ms
//! [canceled] search#3 it belongs to a 'restartable' task that was performed again
//! [counts] search running=1 queued=0
//! ```

use std::fmt::Write as _;

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Prints one line per event. Errors and subscriber reports go to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    pub fn new() -> Self {
        Self
    }

    fn line(e: &Event) -> String {
        let mut out = format!("[{}]", e.kind.as_str());
        match (&e.task, e.instance) {
            (Some(task), Some(id)) => {
                let _ = write!(out, " {task}#{id}");
            }
            (Some(task), None) => {
                let _ = write!(out, " {task}");
            }
            _ => {}
        }
        if let (Some(attempt), Some(delay)) = (e.attempt, e.delay) {
            let _ = write!(out, " attempt={attempt} delay={}ms", delay.as_millis());
        }
        if let (Some(running), Some(queued)) = (e.running, e.queued) {
            let _ = write!(out, " running={running} queued={queued}");
        }
        if let Some(reason) = &e.reason {
            let _ = write!(out, " {reason}");
        }
        out
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let line = Self::line(e);
        match e.kind {
            EventKind::InstanceErrored
            | EventKind::SubscriberOverflow
            | EventKind::SubscriberPanicked => eprintln!("{line}"),
            _ => println!("{line}"),
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_line_format() {
        let retry = Event::for_instance(EventKind::RetryScheduled, "search", 3)
            .with_attempt(1)
            .with_delay(Duration::from_millis(10));
        assert_eq!(
            LogWriter::line(&retry),
            "[retry-scheduled] search#3 attempt=1 delay=10ms"
        );

        let counts = Event::new(EventKind::CountsChanged)
            .with_task("search")
            .with_counts(1, 0);
        assert_eq!(LogWriter::line(&counts), "[counts] search running=1 queued=0");
    }
}
