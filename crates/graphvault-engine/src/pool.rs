//! Bounded fetch fan-out
//!
//! Per-item auxiliary calls (permissions, columns, content types, fields)
//! fan out under a semaphore. Failures land on the fault bus; with
//! fail-fast set, the bus aborts and peers observe it at their next
//! submission point. Cancellation stops new submissions; tasks that
//! already hold a permit run to completion.

use std::future::Future;
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::domain::EngineError;
use graphvault_core::fault::FaultBus;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Bounded concurrent executor for fallible fetches
#[derive(Debug, Clone)]
pub struct FetchPool {
    concurrency: usize,
}

impl FetchPool {
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Run every task, at most `concurrency` at a time, and collect the
    /// successful results. Order of results is not preserved.
    ///
    /// Submission stops early when the bus aborts or the token fires;
    /// in-flight tasks are always awaited.
    pub async fn run_all<T, Fut, I>(
        &self,
        tasks: I,
        cancel: &CancelToken,
        bus: &Arc<FaultBus>,
    ) -> Vec<T>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set: JoinSet<Option<T>> = JoinSet::new();
        let mut submitted: usize = 0;
        let mut skipped: usize = 0;

        for task in tasks {
            if cancel.is_cancelled() || bus.aborted() {
                skipped += 1;
                continue;
            }

            // Acquiring before spawning bounds both execution and
            // submission; the queue never outruns the pool.
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .expect("pool semaphore closed");

            let bus = Arc::clone(bus);
            submitted += 1;

            set.spawn(async move {
                let _permit = permit;
                match task.await {
                    Ok(value) => Some(value),
                    Err(err) => {
                        bus.add_recoverable(err);
                        None
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(submitted);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(value)) => results.push(value),
                Ok(None) => {}
                Err(err) => bus.add_recoverable(EngineError::Consistency(format!(
                    "pooled task panicked: {err}"
                ))),
            }
        }

        if skipped > 0 {
            debug!(submitted, skipped, "pool drained after early stop");
        }

        results
    }
}
