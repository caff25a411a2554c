//! Cooperative cancellation
//!
//! One token type, threaded explicitly through every engine call. Components
//! poll at page boundaries and at pool submission sites; in-flight requests
//! are left to unwind through the transport's own timeouts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::EngineError;

/// A cloneable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Poll point: returns `EngineError::Cancelled` once cancelled
    ///
    /// # Errors
    /// Returns `EngineError::Cancelled` when the token has fired
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}
