//! Cancellation and progress plumbing: a cheap, cloneable cancellation
//! token polled between chunks/files during I/O loops, and a
//! callback-based progress channel the core calls with a relative path and
//! a byte count per chunk. Neither is hidden behind global state; both are
//! threaded explicitly into the routines that need them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CabError, Result};

/// A token that can be polled for cancellation from inside a long-running
/// core routine (folder rewrite, extraction). Cloning shares the same
/// underlying flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that will never report cancellation.
    pub fn new() -> CancelToken {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation; subsequent `check()` calls will fail.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CabError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;

    #[test]
    fn fresh_token_does_not_cancel() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_observed_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }
}
