//! Metadata codec
//!
//! Two files persisted per (owner, category) inside each snapshot:
//! `previousPath.json` and `deltaURLs.json`. Drive categories key both by
//! drive id (paths nest one level deeper, folder id to path); mailbox
//! categories key both by container id.
//!
//! Loading is defensive: a malformed file falls back to a full enumeration
//! for the entries it carried, half-entries (a path with no delta, or the
//! reverse, or an empty token) are purged, and a key claimed by two files
//! is a fatal conflict, because it means the store would graft from an
//! ambiguous base.
//!
//! Serialization goes through ordered maps, so identical content always
//! produces identical bytes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::domain::{state_of, Category, CollectionState, EngineError, RepoPath};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::store::{BackupCollection, BackupItem, LazyData};
use tokio::sync::mpsc;
use tracing::warn;

/// File holding container-id -> path mappings
pub const PREVIOUS_PATH_FILE: &str = "previousPath.json";

/// File holding delta tokens
pub const DELTA_URLS_FILE: &str = "deltaURLs.json";

/// One persisted metadata file, as the store returns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl MetadataFile {
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

// ============================================================================
// Drive-shaped state
// ============================================================================

/// Prior enumeration state for a drive-based category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrivePrevState {
    /// Drive id -> delta token (full URL form)
    pub deltas: BTreeMap<String, String>,
    /// Drive id -> (folder id -> repo path string)
    pub paths: BTreeMap<String, BTreeMap<String, String>>,
}

/// Decode the drive-shaped metadata files
///
/// # Errors
/// Returns `EngineError::MetadataConflict` when the same drive id appears
/// in more than one file of the same kind
pub fn decode_drive_metadata(files: &[MetadataFile]) -> Result<DrivePrevState, EngineError> {
    let mut state = DrivePrevState::default();

    for file in files {
        match file.name.as_str() {
            DELTA_URLS_FILE => {
                merge_unique(
                    &mut state.deltas,
                    decode_or_skip::<BTreeMap<String, String>>(file),
                    file,
                )?;
            }
            PREVIOUS_PATH_FILE => {
                merge_unique(
                    &mut state.paths,
                    decode_or_skip::<BTreeMap<String, BTreeMap<String, String>>>(file),
                    file,
                )?;
            }
            other => {
                warn!(file = other, "skipping unknown metadata file");
            }
        }
    }

    purge_half_entries(&mut state.deltas, &mut state.paths);
    Ok(state)
}

/// Encode drive-shaped metadata; output bytes are deterministic
#[must_use]
pub fn encode_drive_metadata(state: &DrivePrevState) -> Vec<MetadataFile> {
    vec![
        MetadataFile::new(
            PREVIOUS_PATH_FILE,
            serde_json::to_vec(&state.paths).expect("ordered string maps always serialize"),
        ),
        MetadataFile::new(
            DELTA_URLS_FILE,
            serde_json::to_vec(&state.deltas).expect("ordered string maps always serialize"),
        ),
    ]
}

// ============================================================================
// Mailbox-shaped state
// ============================================================================

/// Per-container continuation state for a mailbox-style category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPath {
    pub delta: String,
    pub path: String,
}

/// Container id -> continuation state
pub type DeltaPaths = BTreeMap<String, DeltaPath>;

/// Decode the mailbox-shaped metadata files
///
/// # Errors
/// Returns `EngineError::MetadataConflict` when the same container id
/// appears in more than one file of the same kind
pub fn decode_mailbox_metadata(files: &[MetadataFile]) -> Result<DeltaPaths, EngineError> {
    let mut deltas: BTreeMap<String, String> = BTreeMap::new();
    let mut paths: BTreeMap<String, String> = BTreeMap::new();

    for file in files {
        match file.name.as_str() {
            DELTA_URLS_FILE => {
                merge_unique(
                    &mut deltas,
                    decode_or_skip::<BTreeMap<String, String>>(file),
                    file,
                )?;
            }
            PREVIOUS_PATH_FILE => {
                merge_unique(
                    &mut paths,
                    decode_or_skip::<BTreeMap<String, String>>(file),
                    file,
                )?;
            }
            other => {
                warn!(file = other, "skipping unknown metadata file");
            }
        }
    }

    purge_half_entries(&mut deltas, &mut paths);

    Ok(deltas
        .into_iter()
        .filter_map(|(id, delta)| {
            let path = paths.remove(&id)?;
            Some((id, DeltaPath { delta, path }))
        })
        .collect())
}

/// Encode mailbox-shaped metadata; output bytes are deterministic
#[must_use]
pub fn encode_mailbox_metadata(dps: &DeltaPaths) -> Vec<MetadataFile> {
    let paths: BTreeMap<&String, &String> =
        dps.iter().map(|(id, dp)| (id, &dp.path)).collect();
    let deltas: BTreeMap<&String, &String> =
        dps.iter().map(|(id, dp)| (id, &dp.delta)).collect();

    vec![
        MetadataFile::new(
            PREVIOUS_PATH_FILE,
            serde_json::to_vec(&paths).expect("ordered string maps always serialize"),
        ),
        MetadataFile::new(
            DELTA_URLS_FILE,
            serde_json::to_vec(&deltas).expect("ordered string maps always serialize"),
        ),
    ]
}

// ============================================================================
// Shared plumbing
// ============================================================================

fn decode_or_skip<T: serde::de::DeserializeOwned>(file: &MetadataFile) -> Option<T> {
    match serde_json::from_slice(&file.bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            // A file that won't decode costs its entries a full
            // re-enumeration, nothing more.
            warn!(
                file = %file.name,
                error = %err,
                "undecodable metadata file, falling back to full enumeration"
            );
            None
        }
    }
}

fn merge_unique<V>(
    target: &mut BTreeMap<String, V>,
    decoded: Option<BTreeMap<String, V>>,
    file: &MetadataFile,
) -> Result<(), EngineError> {
    let Some(decoded) = decoded else {
        return Ok(());
    };

    for key in decoded.keys() {
        if target.contains_key(key) {
            return Err(EngineError::MetadataConflict(format!(
                "key {key} appears in more than one {} file",
                file.name
            )));
        }
    }

    target.extend(decoded);
    Ok(())
}

/// Drop empty tokens and unpaired entries so the next run defaults to a
/// full enumeration for them
fn purge_half_entries<P>(deltas: &mut BTreeMap<String, String>, paths: &mut BTreeMap<String, P>) {
    let empty: HashSet<String> = deltas
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k.clone())
        .collect();

    for key in &empty {
        deltas.remove(key);
        paths.remove(key);
    }

    deltas.retain(|k, _| paths.contains_key(k));
    paths.retain(|k, _| deltas.contains_key(k));
}

// ============================================================================
// Metadata collection
// ============================================================================

/// Sibling collection whose items are the two codec files
///
/// Always rebuilt from scratch; the store never grafts into it.
pub struct MetadataCollection {
    full_path: RepoPath,
    files: Vec<MetadataFile>,
}

impl MetadataCollection {
    /// Build the metadata collection for one (owner, category)
    ///
    /// # Errors
    /// Propagates path construction failures
    pub fn new(
        tenant: &str,
        owner: &str,
        category: Category,
        files: Vec<MetadataFile>,
    ) -> Result<Self, EngineError> {
        let full_path = RepoPath::build(tenant, owner, category, Vec::<String>::new())?;
        Ok(Self { full_path, files })
    }
}

impl BackupCollection for MetadataCollection {
    fn full_path(&self) -> Option<&RepoPath> {
        Some(&self.full_path)
    }

    fn previous_path(&self) -> Option<&RepoPath> {
        None
    }

    fn state(&self) -> CollectionState {
        state_of(None, Some(&self.full_path))
    }

    fn do_not_merge_items(&self) -> bool {
        true
    }

    fn items(&self, _cancel: CancelToken, _bus: Arc<FaultBus>) -> mpsc::Receiver<BackupItem> {
        let (tx, rx) = mpsc::channel(self.files.len().max(1));

        for file in &self.files {
            // The channel is sized to the file count; sends cannot block.
            let item = BackupItem {
                id: file.name.clone(),
                deleted: false,
                modified: None,
                info: None,
                data: LazyData::ready(file.bytes.clone()),
            };
            let _ = tx.try_send(item);
        }

        rx
    }
}
