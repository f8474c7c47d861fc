//! # Cancelation tokens.
//!
//! A [`CancelationToken`] answers one question: should this cooperative operation
//! stop? It is true once [`cancel`](CancelationToken::cancel) was called or, for a
//! token minted by a [`CancelationSource`], once the source's liveness check
//! reports the owner gone. Tokens carry no ownership, only the capability to read
//! and request.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use cotask::CancelationSource;
//!
//! let gone = Arc::new(AtomicBool::new(false));
//! let flag = gone.clone();
//! let source = CancelationSource::new(move || flag.load(Ordering::SeqCst));
//!
//! let token = source.token();
//! assert!(!token.is_cancelation_requested());
//! gone.store(true, Ordering::SeqCst);
//! assert!(token.is_cancelation_requested());
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Liveness = Arc<dyn Fn() -> bool + Send + Sync>;

/// Explicit-cancel flag, optionally OR-ed with an owner liveness check.
#[derive(Clone, Default)]
pub struct CancelationToken {
    requested: Arc<AtomicBool>,
    owner_gone: Option<Liveness>,
}

impl CancelationToken {
    /// A token with no owner; only `cancel` trips it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancelation. Idempotent; shared by every clone.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_cancelation_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire) || self.owner_gone.as_ref().is_some_and(|gone| gone())
    }
}

impl fmt::Debug for CancelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationToken")
            .field("requested", &self.is_cancelation_requested())
            .finish()
    }
}

/// Mints tokens bound to an owner liveness check.
#[derive(Clone)]
pub struct CancelationSource {
    owner_gone: Liveness,
}

impl CancelationSource {
    /// `owner_gone` returns true once the owning object was torn down.
    pub fn new<F>(owner_gone: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            owner_gone: Arc::new(owner_gone),
        }
    }

    /// A fresh token: its own cancel flag, plus the owner check.
    pub fn token(&self) -> CancelationToken {
        CancelationToken {
            requested: Arc::new(AtomicBool::new(false)),
            owner_gone: Some(Arc::clone(&self.owner_gone)),
        }
    }
}

impl fmt::Debug for CancelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelationSource").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let token = CancelationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelation_requested());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelation_requested());
    }

    #[test]
    fn test_source_tokens_are_independent() {
        let source = CancelationSource::new(|| false);
        let a = source.token();
        let b = source.token();
        a.cancel();
        assert!(a.is_cancelation_requested());
        assert!(!b.is_cancelation_requested());
    }
}
