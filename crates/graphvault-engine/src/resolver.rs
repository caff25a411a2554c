//! Container resolver
//!
//! Per-category cache of container id to (storage path, display path,
//! parent). Populated from a direct fetch of the category's canonical root
//! plus one enumeration of descendants; display paths resolve lazily by
//! walking ancestor ids, so subtree moves never require pointer rewiring.
//!
//! Storage paths use container ids (stable across renames) while display
//! paths use display names. When two siblings share a display name, the
//! display path gets a disambiguating suffix derived from the id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::domain::{ContainerId, EngineError, PathBuilder};
use graphvault_core::fault::FaultBus;
use graphvault_core::ports::transport::{ContainerClient, ContainerInfo};
use tracing::{debug, warn};

/// Characters of the id used to disambiguate sibling display names
const DISAMBIGUATION_LEN: usize = 6;

/// A cached container and its (lazily resolved) paths
#[derive(Debug, Clone)]
pub struct CachedContainer {
    pub info: ContainerInfo,
    /// Id-based path, set once resolved
    storage: Option<PathBuilder>,
    /// Display-name path, set once resolved
    display: Option<PathBuilder>,
}

impl CachedContainer {
    #[must_use]
    pub fn storage_path(&self) -> Option<&PathBuilder> {
        self.storage.as_ref()
    }

    #[must_use]
    pub fn display_path(&self) -> Option<&PathBuilder> {
        self.display.as_ref()
    }
}

/// Id-keyed container cache for one (owner, category)
#[derive(Debug, Default)]
pub struct ContainerResolver {
    cache: HashMap<String, CachedContainer>,
    /// Ids whose display name collides with a sibling's
    ambiguous: HashSet<String>,
    /// Display name -> id, for containers created during this run
    /// (calendar-style create-by-name)
    new_additions: HashMap<String, String>,
}

impl ContainerResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the root container and enumerate its descendants, then resolve
    /// every path. Malformed containers are recorded on the bus and
    /// skipped; orphans (no walkable ancestor chain) likewise.
    pub async fn populate(
        &mut self,
        client: &Arc<dyn ContainerClient>,
        owner: &str,
        root_id: &ContainerId,
        base_storage: PathBuilder,
        base_display: PathBuilder,
        use_id_in_path: bool,
        cancel: &CancelToken,
        bus: &Arc<FaultBus>,
    ) -> Result<(), EngineError> {
        cancel.check()?;

        let root = client.get_container(owner, root_id).await?;
        let root_key = root.id.as_str().to_string();

        self.cache.insert(
            root_key.clone(),
            CachedContainer {
                info: root,
                storage: Some(base_storage.clone()),
                display: Some(base_display.clone()),
            },
        );

        cancel.check()?;

        for container in client.list_containers(owner, root_id).await? {
            if container.id.as_str() == root_key {
                continue;
            }

            // Flat namespaces (calendars) arrive without parent links;
            // anchor each directly under the base. No sibling dedup here:
            // the server itself allows duplicate calendar names, and the
            // id-based storage path keeps them distinct.
            if container.parent_id.is_none() {
                if container.display_name.is_empty() {
                    bus.add_recoverable(EngineError::Validation(format!(
                        "container {} has no display name",
                        container.id.as_str()
                    )));
                    continue;
                }

                let storage_elem = if use_id_in_path {
                    container.id.as_str().to_string()
                } else {
                    container.display_name.clone()
                };
                let display_elem = container.display_name.clone();

                self.cache.insert(
                    container.id.as_str().to_string(),
                    CachedContainer {
                        storage: Some(base_storage.append(storage_elem)),
                        display: Some(base_display.append(display_elem)),
                        info: container,
                    },
                );
                continue;
            }

            if let Err(err) = self.add_folder(container) {
                bus.add_recoverable(err);
            }
        }

        self.refresh_collisions();
        self.populate_paths(use_id_in_path, bus);

        debug!(
            owner,
            containers = self.cache.len(),
            "container resolver populated"
        );

        Ok(())
    }

    /// Idempotent insert of an enumerated container
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when the display name is missing
    pub fn add_folder(&mut self, container: ContainerInfo) -> Result<(), EngineError> {
        if container.display_name.is_empty() {
            return Err(EngineError::Validation(format!(
                "container {} has no display name",
                container.id.as_str()
            )));
        }

        self.cache
            .entry(container.id.as_str().to_string())
            .or_insert(CachedContainer {
                info: container,
                storage: None,
                display: None,
            });

        Ok(())
    }

    /// Insert a container created mid-run and resolve its path immediately,
    /// recording its display name for [`ContainerResolver::destination_name_to_id`]
    ///
    /// # Errors
    /// Propagates validation and resolution failures; the name mapping is
    /// rolled back on error
    pub fn add_to_cache(
        &mut self,
        container: ContainerInfo,
        use_id_in_path: bool,
    ) -> Result<(), EngineError> {
        let name = container.display_name.clone();
        let id = container.id.as_str().to_string();

        self.new_additions.insert(name.clone(), id.clone());

        if let Err(err) = self.add_folder(container) {
            self.new_additions.remove(&name);
            return Err(err);
        }

        if let Err(err) = self.id_to_path(&id, use_id_in_path) {
            self.new_additions.remove(&name);
            return Err(err);
        }

        Ok(())
    }

    /// Id of a container created under this display name during the run.
    /// Only calendars create by name; other categories never populate this
    /// and get the empty string.
    #[must_use]
    pub fn destination_name_to_id(&self, name: &str) -> String {
        self.new_additions.get(name).cloned().unwrap_or_default()
    }

    /// Resolve (storage, display) for a container, walking unresolved
    /// ancestors by id and caching every path on the way down
    ///
    /// # Errors
    /// - `EngineError::Validation` for unknown ids or orphan chains
    /// - `EngineError::Consistency` for parent cycles
    pub fn id_to_path(
        &mut self,
        id: &str,
        use_id_in_path: bool,
    ) -> Result<(PathBuilder, PathBuilder), EngineError> {
        // Climb until a resolved ancestor, remembering the unresolved chain.
        let mut chain: Vec<String> = Vec::new();
        let mut cursor = id.to_string();

        loop {
            let Some(entry) = self.cache.get(&cursor) else {
                return Err(EngineError::Validation(format!(
                    "container {cursor} not in cache"
                )));
            };

            if entry.storage.is_some() {
                break;
            }

            chain.push(cursor.clone());

            match &entry.info.parent_id {
                Some(parent) => {
                    cursor = parent.as_str().to_string();
                    if chain.contains(&cursor) {
                        return Err(EngineError::Consistency(format!(
                            "container ancestry cycle at {cursor}"
                        )));
                    }
                }
                None => {
                    return Err(EngineError::Validation(format!(
                        "container {id} has no resolvable ancestor"
                    )));
                }
            }
        }

        // Descend, building and caching both paths.
        let resolved = &self.cache[&cursor];
        let mut storage = resolved.storage.clone().expect("checked above");
        let mut display = resolved.display.clone().expect("checked above");

        for cid in chain.iter().rev() {
            let entry = self.cache.get(cid).expect("chain entries are cached");
            let name = entry.info.display_name.clone();

            let display_elem = if self.ambiguous.contains(cid) {
                let prefix: String = cid.chars().take(DISAMBIGUATION_LEN).collect();
                format!("{name} ({prefix})")
            } else {
                name.clone()
            };

            storage = storage.append(if use_id_in_path { cid.clone() } else { name });
            display = display.append(display_elem);

            let entry = self.cache.get_mut(cid).expect("chain entries are cached");
            entry.storage = Some(storage.clone());
            entry.display = Some(display.clone());
        }

        let entry = &self.cache[id];
        Ok((
            entry.storage.clone().expect("resolved above"),
            entry.display.clone().expect("resolved above"),
        ))
    }

    /// Resolve every cached container; unresolvable ones are recorded and
    /// left unpathed
    pub fn populate_paths(&mut self, use_id_in_path: bool, bus: &Arc<FaultBus>) {
        let ids: Vec<String> = self.cache.keys().cloned().collect();

        for id in ids {
            if let Err(err) = self.id_to_path(&id, use_id_in_path) {
                warn!(container = %id, error = %err, "dropping unresolvable container");
                bus.add_recoverable(err);
            }
        }
    }

    /// Recompute which ids need display-name disambiguation
    pub fn refresh_collisions(&mut self) {
        let mut by_sibling_name: HashMap<(Option<String>, String), Vec<String>> = HashMap::new();

        for (id, entry) in &self.cache {
            let parent = entry.info.parent_id.as_ref().map(|p| p.as_str().to_string());
            by_sibling_name
                .entry((parent, entry.info.display_name.clone()))
                .or_default()
                .push(id.clone());
        }

        self.ambiguous = by_sibling_name
            .into_values()
            .filter(|ids| ids.len() > 1)
            .flatten()
            .collect();
    }

    /// All resolved containers
    pub fn items(&self) -> impl Iterator<Item = (&str, &CachedContainer)> {
        self.cache
            .iter()
            .filter(|(_, c)| c.storage.is_some())
            .map(|(id, c)| (id.as_str(), c))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
