//! Per-instance driver task.
//!
//! One tokio task per launched instance. It waits for the optional start gate,
//! then polls the body through [`InstanceCore::step`] until it settles. Every
//! resumption reaches the body through the driver's waker, never inline from the
//! resolving code.

use std::future::poll_fn;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::TaskError;
use crate::instance::GATE_FAILED;
use crate::instance::core::{BoxBody, InstanceCore};

pub(crate) async fn drive(
    core: Arc<InstanceCore>,
    mut body: BoxBody,
    gate: Option<BoxFuture<'static, Result<(), TaskError>>>,
) {
    if let Some(gate) = gate {
        tokio::select! {
            res = gate => {
                if res.is_err() {
                    core.cancel(Arc::from(GATE_FAILED));
                }
            }
            _ = core.settled() => {}
        }
    }

    let outcome = poll_fn(|cx| core.step(cx, body.as_mut())).await;
    drop(body);
    if let Some(outcome) = outcome {
        core.settle(outcome);
    }
}
