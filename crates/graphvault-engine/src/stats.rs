//! Run counters
//!
//! Tracks what an enumeration touched. Counters are plain additive data;
//! anything concurrent accumulates locally and merges at a join point.

use serde::{Deserialize, Serialize};

/// Counts from one backup run (or one slice of it)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Items enqueued for backup, including metadata sidecars' primaries
    #[serde(default, skip_serializing_if = "is_zero")]
    pub items: u64,
    /// Files among the items (deletes included, matching what streams)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub files: u64,
    /// Containers that materialized as collections
    #[serde(default, skip_serializing_if = "is_zero")]
    pub containers: u64,
    /// Drives enumerated
    #[serde(default, skip_serializing_if = "is_zero")]
    pub drives: u64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl RunStats {
    /// Fold another slice of counters into this one
    pub fn merge(&mut self, other: RunStats) {
        self.items += other.items;
        self.files += other.files;
        self.containers += other.containers;
        self.drives += other.drives;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_additive() {
        let mut a = RunStats {
            items: 3,
            files: 2,
            containers: 1,
            drives: 1,
        };
        a.merge(RunStats {
            items: 4,
            files: 4,
            containers: 2,
            drives: 0,
        });

        assert_eq!(
            a,
            RunStats {
                items: 7,
                files: 6,
                containers: 3,
                drives: 1,
            }
        );
    }
}
