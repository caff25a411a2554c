//! Fault aggregation for partial-failure runs
//!
//! A backup run touches thousands of items; one malformed item must not take
//! the run down unless the caller asked for fail-fast behavior. The bus
//! records per-item failures up to a cap, keeps an exact total, and carries
//! at most one fatal failure that aborts the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::EngineError;

/// How many recoverable errors are kept verbatim; beyond this only the
/// count grows
pub const MAX_RECORDED_FAULTS: usize = 10;

#[derive(Debug, Default)]
struct Inner {
    failure: Option<EngineError>,
    recovered: Vec<EngineError>,
    total_recovered: usize,
}

/// Shared fault sink for one run
///
/// Cloned handles (via `Arc`) are passed to every fan-out site. With
/// fail-fast set, the first recoverable error is promoted to the fatal slot
/// and peers observe it through [`FaultBus::aborted`] at their next
/// submission point.
#[derive(Debug)]
pub struct FaultBus {
    fail_fast: bool,
    inner: Mutex<Inner>,
}

impl FaultBus {
    #[must_use]
    pub fn new(fail_fast: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_fast,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Record a run-aborting failure. The first failure wins; later ones
    /// are downgraded to recoverable records so they aren't lost.
    pub fn fail(&self, err: EngineError) {
        let mut inner = self.inner.lock().expect("fault bus poisoned");
        if inner.failure.is_none() {
            tracing::error!(error = %err, "run failed");
            inner.failure = Some(err);
        } else {
            push_recovered(&mut inner, err);
        }
    }

    /// Record a per-item error that the run can survive
    pub fn add_recoverable(&self, err: EngineError) {
        if self.fail_fast {
            self.fail(err);
            return;
        }

        let mut inner = self.inner.lock().expect("fault bus poisoned");
        tracing::warn!(error = %err, "recoverable fault");
        push_recovered(&mut inner, err);
    }

    /// True once a fatal failure is registered; fan-out sites poll this
    /// between submissions
    #[must_use]
    pub fn aborted(&self) -> bool {
        self.inner
            .lock()
            .expect("fault bus poisoned")
            .failure
            .is_some()
    }

    /// The fatal failure, if any
    #[must_use]
    pub fn failure(&self) -> Option<EngineError> {
        self.inner
            .lock()
            .expect("fault bus poisoned")
            .failure
            .clone()
    }

    /// Snapshot of the current fault state
    #[must_use]
    pub fn snapshot(&self) -> FaultSnapshot {
        let inner = self.inner.lock().expect("fault bus poisoned");
        FaultSnapshot {
            failure: inner.failure.clone(),
            recovered: inner.recovered.clone(),
            total_recovered: inner.total_recovered,
        }
    }

    /// A local tracker for one fan-out site
    #[must_use]
    pub fn tracker(self: &Arc<Self>) -> FaultTracker {
        FaultTracker {
            bus: Arc::clone(self),
            local_failure: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn push_recovered(inner: &mut Inner, err: EngineError) {
    if inner.recovered.len() < MAX_RECORDED_FAULTS {
        inner.recovered.push(err);
    }
    inner.total_recovered += 1;
}

/// Frozen view of the bus, returned with the operation result
#[derive(Debug, Clone)]
pub struct FaultSnapshot {
    /// The failure that aborted the run, if any
    pub failure: Option<EngineError>,
    /// Up to [`MAX_RECORDED_FAULTS`] recoverable errors, in arrival order
    pub recovered: Vec<EngineError>,
    /// Exact count of recoverable errors, including unrecorded ones
    pub total_recovered: usize,
}

impl FaultSnapshot {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && self.total_recovered == 0
    }
}

/// Per-site view over the shared bus
///
/// A tracker remembers whether its own site contributed an error, so a loop
/// can stop submitting work for its scope without consulting the global
/// fail-fast state.
#[derive(Debug, Clone)]
pub struct FaultTracker {
    bus: Arc<FaultBus>,
    local_failure: Arc<AtomicBool>,
}

impl FaultTracker {
    /// Record an error for this site
    pub fn add(&self, err: EngineError) {
        self.local_failure.store(true, Ordering::SeqCst);
        self.bus.add_recoverable(err);
    }

    /// True when this site recorded an error, or the whole run aborted
    #[must_use]
    pub fn failed(&self) -> bool {
        self.local_failure.load(Ordering::SeqCst) || self.bus.aborted()
    }
}
