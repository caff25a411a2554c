//! Collection merger
//!
//! Grafting support: for items untouched since a prior snapshot, the store
//! reuses the old bytes and asks the engine to carry the old details entry
//! forward, rewritten to the item's current path. Each request resolves
//! against exactly one prior manifest, matched by the Reasons it covers.

use std::collections::HashMap;

use async_trait::async_trait;
use graphvault_core::domain::{Category, EngineError, PathBuilder, RepoPath, Service};
use graphvault_core::ports::store::PrevRef;
use tracing::debug;

use crate::details::{DetailsBuilder, DetailsLedger};

/// What a prior snapshot covers: one (owner, service, category) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reason {
    pub owner: String,
    pub service: Service,
    pub category: Category,
}

/// A prior snapshot manifest, as the store describes it
#[derive(Debug, Clone)]
pub struct ManifestInfo {
    pub id: String,
    pub reasons: Vec<Reason>,
    /// Set on partial snapshots (e.g. `"checkpoint"`); such manifests are
    /// never merge bases
    pub incomplete_reason: Option<String>,
}

impl ManifestInfo {
    fn covers(&self, owner: &str, service: Service, category: Category) -> bool {
        self.incomplete_reason.is_none()
            && self
                .reasons
                .iter()
                .any(|r| r.owner == owner && r.service == service && r.category == category)
    }
}

/// Source of prior details ledgers, backed by the store
#[async_trait]
pub trait DetailsProvider: Send + Sync {
    async fn details(&self, manifest_id: &str) -> Result<DetailsLedger, EngineError>;
}

/// One item the store wants grafted
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// Where the item's entry lives in the prior base
    pub prev: PrevRef,
    /// Where the item lives now
    pub new_repo_path: RepoPath,
    /// Current logical location by display names
    pub new_location: Option<PathBuilder>,
}

/// Merges prior details entries into the new run's ledger
pub struct Merger<'p> {
    manifests: Vec<ManifestInfo>,
    provider: &'p dyn DetailsProvider,
    ledgers: HashMap<String, DetailsLedger>,
}

impl<'p> Merger<'p> {
    #[must_use]
    pub fn new(manifests: Vec<ManifestInfo>, provider: &'p dyn DetailsProvider) -> Self {
        Self {
            manifests,
            provider,
            ledgers: HashMap::new(),
        }
    }

    /// Process the store's merge requests into the builder
    ///
    /// Returns the number of entries carried forward.
    ///
    /// # Errors
    /// - `EngineError::Configuration` when zero or multiple manifests
    ///   cover a request
    /// - `EngineError::MissingBase` when the matched manifest's ledger has
    ///   no entry at the previous path; silently dropping it would lose
    ///   the item from the new snapshot's record
    pub async fn merge(
        &mut self,
        owner: &str,
        requests: &[MergeRequest],
        builder: &DetailsBuilder,
    ) -> Result<usize, EngineError> {
        let mut merged = 0usize;

        for request in requests {
            let prev_path = &request.prev.previous_repo_path;
            let service = prev_path.service();
            let category = prev_path.category();

            let candidates: Vec<&ManifestInfo> = self
                .manifests
                .iter()
                .filter(|m| m.covers(owner, service, category))
                .collect();

            let manifest = match candidates.as_slice() {
                [one] => (*one).clone(),
                [] => {
                    return Err(EngineError::Configuration(format!(
                        "no manifest covers {owner}/{service}/{category}"
                    )));
                }
                many => {
                    return Err(EngineError::Configuration(format!(
                        "{} manifests cover {owner}/{service}/{category}",
                        many.len()
                    )));
                }
            };

            if !self.ledgers.contains_key(&manifest.id) {
                let ledger = self.provider.details(&manifest.id).await?;
                self.ledgers.insert(manifest.id.clone(), ledger);
            }
            let ledger = &self.ledgers[&manifest.id];

            let prev_repo_ref = prev_path.to_string();
            let Some(entry) = ledger.find_by_repo_ref(&prev_repo_ref) else {
                return Err(EngineError::MissingBase(format!(
                    "no prior details entry at {prev_repo_ref}"
                )));
            };

            let new_repo_ref = request.new_repo_path.to_string();
            let updated = entry.repo_ref != new_repo_ref;

            let mut info = entry.info.clone();
            info.update_parent_path(&request.new_repo_path)?;

            builder.add_item(
                &request.new_repo_path,
                request.new_location.as_ref(),
                updated,
                info,
            )?;

            merged += 1;
        }

        debug!(merged, "prior details entries carried forward");
        Ok(merged)
    }
}
