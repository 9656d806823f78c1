//! Build context: cancellation and progress reporting.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::compile::{Invocation, Prune, Stage};

/// Handle for cancelling a build.
///
/// `AbortHandle` can be cloned and shared across threads; any clone can
/// trigger the abort, which will be visible to all other clones. The
/// pipeline checks it before starting each external process, between
/// retries, and while waiting for a running process.
///
/// # Example
///
/// ```
/// use kiln_core::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let handle_clone = handle.clone();
///
/// assert!(!handle.is_aborted());
/// handle_clone.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new abort handle.
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Request the build to stop. Running processes are killed.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Return `Err(Error::Aborted)` if abort has been requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_aborted() {
            Err(crate::Error::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Callback trait for build progress reporting.
///
/// All methods have empty defaults so implementors only override what they
/// display.
pub trait BuildCallback: Send + Sync {
    /// Called when the pipeline enters a new stage.
    fn on_stage(&self, _stage: Stage) {}

    /// Called right before an external command starts.
    fn on_command(&self, _invocation: &Invocation) {}

    /// Called when a transient failure is being retried.
    fn on_retry(&self, _retry: u32, _prune: &Prune) {}

    /// Called after the workspace has been removed.
    fn on_teardown(&self, _workspace: &Path) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_handle_new() {
        let handle = AbortHandle::new();
        assert!(!handle.is_aborted());
        assert!(handle.check().is_ok());
    }

    #[test]
    fn test_abort_handle_clone_shares_state() {
        let handle = AbortHandle::new();
        let clone = handle.clone();

        clone.abort();

        assert!(handle.is_aborted());
        assert!(matches!(handle.check(), Err(crate::Error::Aborted)));
    }

    #[test]
    fn test_abort_handle_default() {
        let handle = AbortHandle::default();
        assert!(!handle.is_aborted());
    }
}
