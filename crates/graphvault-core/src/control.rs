//! Run options
//!
//! A single knob set passed into the top-level operation and threaded down
//! to the components that care.

use std::time::Duration;

/// Default per-item fetch fan-out
pub const DEFAULT_FETCH_CONCURRENCY: usize = 5;

/// Default bound on the collection item channel; the producer blocks when
/// the store falls behind
pub const DEFAULT_COLLECTION_BUFFER: usize = 5;

/// Default per-request deadline applied by the transport
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Options controlling a backup run
#[derive(Debug, Clone)]
pub struct Options {
    /// Abort on the first per-item error instead of aggregating
    pub fail_fast: bool,
    /// Concurrent per-item auxiliary fetches per collection
    pub fetch_concurrency: usize,
    /// Buffered items between a collection and the store
    pub collection_buffer: usize,
    /// Deadline applied to each transport call
    pub request_timeout: Duration,
    /// When false, item metadata readers emit an empty permissions document
    /// instead of calling the permissions endpoint
    pub backup_permissions: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            fail_fast: false,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            collection_buffer: DEFAULT_COLLECTION_BUFFER,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backup_permissions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = Options::default();
        assert!(!opts.fail_fast);
        assert!(opts.fetch_concurrency >= 4 && opts.fetch_concurrency <= 8);
        assert!(opts.collection_buffer > 0);
        assert!(opts.backup_permissions);
    }
}
