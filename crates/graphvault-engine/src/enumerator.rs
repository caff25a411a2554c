//! Drive enumeration
//!
//! Drives the delta pager for one drive, feeds pages to the reconciler,
//! and handles token resets by rebuilding the reconciliation from scratch.
//! The category-level producer runs every drive of an owner, enforces the
//! delta/paths pairing invariant, and emits the metadata collection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::control::Options;
use graphvault_core::domain::{Category, DeltaToken, EngineError, RepoPath};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::selector::FolderMatcher;
use graphvault_core::ports::store::BackupCollection;
use graphvault_core::ports::transport::{Drive, DriveClient};
use tracing::{debug, info, warn};

use crate::metadata::{
    decode_drive_metadata, encode_drive_metadata, DrivePrevState, MetadataCollection, MetadataFile,
};
use crate::reconciler::{ReconcileResults, Reconciler};
use crate::stats::RunStats;

/// Outcome of enumerating one drive
pub struct DriveEnumeration {
    pub results: ReconcileResults,
    /// Terminal delta link, absent when the server withheld one
    pub delta_token: Option<String>,
    /// True when the enumeration was rebuilt after a token reset
    pub reset: bool,
}

/// Enumerate one drive: pull pages, reconcile, recover from resets
///
/// On a reset the pager restarts from an empty token and the reconciler is
/// rebuilt with empty path state and `invalid_prev_delta` set; previous
/// paths are still consulted for state classification, so surviving
/// containers come back Moved/NotMoved rather than New.
///
/// # Errors
/// Propagates transport failures, consistency violations, and fail-fast
/// aborts
#[allow(clippy::too_many_arguments)]
pub async fn enumerate_drive(
    tenant: &str,
    owner: &str,
    category: Category,
    drive: &Drive,
    transport: &Arc<dyn DriveClient>,
    matcher: &Arc<dyn FolderMatcher>,
    options: &Options,
    prev_delta: Option<String>,
    old_paths: &BTreeMap<String, String>,
    cancel: &CancelToken,
    bus: &Arc<FaultBus>,
) -> Result<DriveEnumeration, EngineError> {
    let token = prev_delta.and_then(|t| DeltaToken::new(t).ok());
    let invalid_prev_delta = token.is_none();

    let mut pager = transport.item_pager(&drive.id, token);

    let new_reconciler = |initial: BTreeMap<String, String>, invalid: bool| {
        Reconciler::new(
            tenant,
            owner,
            category,
            drive.id.clone(),
            drive.name.clone(),
            Arc::clone(transport),
            Arc::clone(matcher),
            options.clone(),
            initial,
            invalid,
        )
    };

    let mut reconciler = new_reconciler(old_paths.clone(), invalid_prev_delta);
    let mut delta_token: Option<String> = None;
    let mut reset = false;

    loop {
        match pager.next_page(cancel).await {
            Ok(Some(page)) => {
                if let Some(link) = &page.delta_link {
                    delta_token = Some(link.clone());
                }

                reconciler.apply_page(page.items, old_paths, bus)?;

                if bus.aborted() {
                    return Err(bus.failure().unwrap_or(EngineError::Cancelled));
                }
            }

            Ok(None) => break,

            Err(err) if err.is_resync_required() => {
                warn!(
                    drive = drive.id.as_str(),
                    "delta token invalidated, rebuilding enumeration"
                );

                reset = true;
                delta_token = None;
                pager.reset();
                reconciler = new_reconciler(BTreeMap::new(), true);
            }

            Err(err) => return Err(err),
        }
    }

    // After a reset no delete events ever arrived, so every previously
    // known container that did not resurface becomes a tombstone. A path
    // that a live collection re-occupied is a recreation, not a survival
    // of the old folder, and gets no tombstone.
    if reset {
        let occupied = reconciler.collection_full_paths();

        for (container_id, prev_path) in old_paths {
            if reconciler.new_paths().contains_key(container_id) {
                continue;
            }
            if occupied.contains(prev_path) {
                continue;
            }

            let prev = RepoPath::from_data_layer(prev_path, false)?;
            reconciler.insert_tombstone(container_id, prev);
        }
    }

    let mut results = reconciler.into_results();
    prune_deleted_subtrees(&mut results);

    debug!(
        drive = drive.id.as_str(),
        collections = results.collections.len(),
        paths = results.new_paths.len(),
        excluded = results.excluded.len(),
        reset,
        "drive enumeration complete"
    );

    Ok(DriveEnumeration {
        results,
        delta_token,
        reset,
    })
}

/// Defensive sweep before the map is persisted: entries still sitting under
/// a tombstoned prefix would resurrect the subtree on the next run. The
/// server normally emits per-descendant deletes, so this usually removes
/// nothing; a recreated path (live collection at the same spot) is left
/// alone.
fn prune_deleted_subtrees(results: &mut ReconcileResults) {
    use graphvault_core::domain::path::replace_path_prefix;

    let occupied: BTreeSet<String> = results
        .collections
        .values()
        .filter_map(|c| c.full_path().map(|p| p.to_string()))
        .collect();

    let dead_prefixes: Vec<String> = results
        .collections
        .values()
        .filter(|c| c.full_path().is_none())
        .filter_map(|c| c.previous_path().map(|p| p.to_string()))
        .filter(|p| !occupied.contains(p))
        .collect();

    if dead_prefixes.is_empty() {
        return;
    }

    results.new_paths.retain(|_, path| {
        !dead_prefixes
            .iter()
            .any(|prefix| replace_path_prefix(path, prefix, "").is_some())
    });
}

/// Produces the backup collections for one (owner, drive-based category)
pub struct DriveBackupProducer {
    tenant: String,
    owner: String,
    category: Category,
    transport: Arc<dyn DriveClient>,
    matcher: Arc<dyn FolderMatcher>,
    options: Options,
}

/// What one category contributes to the run
pub struct CategoryBackup {
    pub collections: Vec<Box<dyn BackupCollection>>,
    pub excluded: BTreeSet<String>,
    pub stats: RunStats,
}

impl DriveBackupProducer {
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        owner: impl Into<String>,
        category: Category,
        transport: Arc<dyn DriveClient>,
        matcher: Arc<dyn FolderMatcher>,
        options: Options,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            owner: owner.into(),
            category,
            transport,
            matcher,
            options,
        }
    }

    /// Enumerate every drive of the owner and assemble the category's
    /// collections, exclusions, and refreshed metadata
    ///
    /// # Errors
    /// Propagates fatal enumeration failures; a metadata conflict is
    /// recorded and downgraded to a full backup of the category
    pub async fn collect(
        &self,
        prev_metadata: &[MetadataFile],
        cancel: &CancelToken,
        bus: &Arc<FaultBus>,
    ) -> Result<CategoryBackup, EngineError> {
        let prev = match decode_drive_metadata(prev_metadata) {
            Ok(state) => state,
            Err(err) => {
                // Self-contradictory state must never feed a graft; the
                // category rebuilds from scratch instead.
                warn!(
                    category = %self.category,
                    error = %err,
                    "metadata conflict, forcing full enumeration"
                );
                bus.add_recoverable(err);
                DrivePrevState::default()
            }
        };

        let drives = self.transport.list_drives(&self.owner).await?;

        let mut new_state = DrivePrevState::default();
        let mut excluded = BTreeSet::new();
        let mut collections: Vec<Box<dyn BackupCollection>> = Vec::new();
        let mut stats = RunStats::default();

        for drive in &drives {
            cancel.check()?;

            let drive_key = drive.id.as_str().to_string();
            let prev_delta = prev.deltas.get(&drive_key).cloned();
            let old_paths = prev.paths.get(&drive_key).cloned().unwrap_or_default();

            info!(
                drive = %drive_key,
                prev_paths = old_paths.len(),
                has_prev_delta = prev_delta.is_some(),
                "enumerating drive"
            );

            let enumeration = enumerate_drive(
                &self.tenant,
                &self.owner,
                self.category,
                drive,
                &self.transport,
                &self.matcher,
                &self.options,
                prev_delta,
                &old_paths,
                cancel,
                bus,
            )
            .await?;

            stats.drives += 1;
            stats.items += enumeration.results.counts.items;
            stats.files += enumeration.results.counts.files;
            stats.containers += enumeration.results.counts.containers;

            // Paired persistence: a token with no surviving paths (or the
            // reverse) persists as neither, so the next run falls back to
            // a clean full enumeration for this drive.
            match (&enumeration.delta_token, enumeration.results.new_paths.is_empty()) {
                (Some(token), false) if !token.is_empty() => {
                    new_state.deltas.insert(drive_key.clone(), token.clone());
                    new_state
                        .paths
                        .insert(drive_key.clone(), enumeration.results.new_paths.clone());
                }
                _ => {
                    debug!(drive = %drive_key, "withholding unpaired enumeration state");
                }
            }

            if !enumeration.reset {
                excluded.extend(enumeration.results.excluded);
            }

            collections.extend(
                enumeration
                    .results
                    .collections
                    .into_values()
                    .map(|c| Box::new(c) as Box<dyn BackupCollection>),
            );
        }

        let files = encode_drive_metadata(&new_state);
        collections.push(Box::new(MetadataCollection::new(
            &self.tenant,
            &self.owner,
            self.category,
            files,
        )?));

        info!(
            category = %self.category,
            collections = collections.len(),
            excluded = excluded.len(),
            "category enumeration complete"
        );

        Ok(CategoryBackup {
            collections,
            excluded,
            stats,
        })
    }
}
