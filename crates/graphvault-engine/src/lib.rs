//! Graphvault Engine - incremental enumeration and collection
//!
//! The core of a backup run: discover the container tree for a resource
//! owner, enumerate items through server-side delta tokens, reconcile the
//! results against persisted prior state, and emit backup collections with
//! correct per-collection states plus the exclusion set the store needs to
//! graft the new snapshot onto a prior base.
//!
//! ## Components
//!
//! - [`resolver::ContainerResolver`]: container id -> path cache
//! - [`enumerator`]: the per-drive delta loop and drive-category producer
//! - [`reconciler::Reconciler`]: the tree reconciliation core
//! - [`mailbox`]: per-container enumeration for mail, contacts, events
//! - [`collection::DriveCollection`]: lazily streamed collections
//! - [`pool::FetchPool`]: bounded auxiliary fan-out
//! - [`metadata`]: the persisted previousPath/deltaURLs codec
//! - [`merger::Merger`] / [`details`]: prior-base grafting bookkeeping
//! - [`libraries`]: site list backup

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use graphvault_core::cancel::CancelToken;
use graphvault_core::control::Options;
use graphvault_core::domain::{Category, EngineError, ResourceOwner};
use graphvault_core::fault::{FaultBus, FaultSnapshot};
use graphvault_core::ports::selector::FolderMatcher;
use graphvault_core::ports::store::BackupCollection;
use graphvault_core::ports::transport::{ContainerClient, DriveClient, ListClient, MailboxClient};
use tracing::{error, info};

pub mod collection;
pub mod details;
pub mod enumerator;
pub mod libraries;
pub mod mailbox;
pub mod merger;
pub mod metadata;
pub mod pool;
pub mod reconciler;
pub mod resolver;
pub mod stats;

pub use enumerator::{CategoryBackup, DriveBackupProducer};
pub use mailbox::MailboxBackupProducer;
pub use metadata::MetadataFile;
pub use stats::RunStats;

/// The two capabilities a mailbox category needs
#[derive(Clone)]
pub struct MailboxClients {
    pub containers: Arc<dyn ContainerClient>,
    pub items: Arc<dyn MailboxClient>,
}

/// Transport endpoints per category; absent entries make the category
/// unavailable
#[derive(Clone, Default)]
pub struct EngineClients {
    pub files: Option<Arc<dyn DriveClient>>,
    pub libraries: Option<Arc<dyn DriveClient>>,
    pub mail: Option<MailboxClients>,
    pub contacts: Option<MailboxClients>,
    pub events: Option<MailboxClients>,
    /// Site list endpoints; enriches the Libraries category when present
    pub lists: Option<(Arc<dyn ContainerClient>, Arc<dyn ListClient>)>,
}

/// Everything one run produced
pub struct RunResult {
    pub collections: Vec<Box<dyn BackupCollection>>,
    /// Blob names the store must drop when grafting onto a prior base
    pub excluded: BTreeSet<String>,
    pub stats: RunStats,
    /// The failure that aborted the run, if any, plus all recoverable
    /// faults
    pub faults: FaultSnapshot,
}

impl RunResult {
    /// True when the run completed without a fatal failure
    #[must_use]
    pub fn completed(&self) -> bool {
        self.faults.failure.is_none()
    }
}

/// Top-level backup operation over an owner's categories
pub struct BackupEngine {
    clients: EngineClients,
}

impl BackupEngine {
    #[must_use]
    pub fn new(clients: EngineClients) -> Self {
        Self { clients }
    }

    /// Run the engine for one resource owner
    ///
    /// `prev_metadata` carries the codec files recovered from the prior
    /// snapshot, keyed by category; missing entries default that category
    /// to a full enumeration.
    ///
    /// A fatal failure stops further categories; whatever was already
    /// produced is returned together with the fault snapshot.
    pub async fn run(
        &self,
        owner: &ResourceOwner,
        categories: &[Category],
        matcher: Arc<dyn FolderMatcher>,
        options: Options,
        prev_metadata: &HashMap<Category, Vec<MetadataFile>>,
        cancel: &CancelToken,
    ) -> RunResult {
        let bus = FaultBus::new(options.fail_fast);

        let mut collections: Vec<Box<dyn BackupCollection>> = Vec::new();
        let mut excluded = BTreeSet::new();
        let mut stats = RunStats::default();

        for category in categories {
            let prior = prev_metadata
                .get(category)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let outcome = self
                .run_category(owner, *category, &matcher, &options, prior, cancel, &bus)
                .await;

            match outcome {
                Ok(mut backups) => {
                    for backup in backups.drain(..) {
                        collections.extend(backup.collections);
                        excluded.extend(backup.excluded);
                        stats.merge(backup.stats);
                    }
                }
                Err(err) => {
                    error!(category = %category, error = %err, "category enumeration failed");
                    bus.fail(err);
                    break;
                }
            }
        }

        let faults = bus.snapshot();

        info!(
            owner = %owner,
            collections = collections.len(),
            excluded = excluded.len(),
            recovered_faults = faults.total_recovered,
            fatal = faults.failure.is_some(),
            "backup run finished"
        );

        RunResult {
            collections,
            excluded,
            stats,
            faults,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_category(
        &self,
        owner: &ResourceOwner,
        category: Category,
        matcher: &Arc<dyn FolderMatcher>,
        options: &Options,
        prior: &[MetadataFile],
        cancel: &CancelToken,
        bus: &Arc<FaultBus>,
    ) -> Result<Vec<CategoryBackup>, EngineError> {
        cancel.check()?;

        let tenant = owner.tenant();
        let owner_id = owner.id();

        match category {
            Category::Files | Category::Libraries => {
                let client = if category == Category::Files {
                    self.clients.files.as_ref()
                } else {
                    self.clients.libraries.as_ref()
                }
                .ok_or_else(|| {
                    EngineError::Configuration(format!("no transport configured for {category}"))
                })?;

                let producer = DriveBackupProducer::new(
                    tenant,
                    owner_id,
                    category,
                    Arc::clone(client),
                    Arc::clone(matcher),
                    options.clone(),
                );

                let mut backups = vec![producer.collect(prior, cancel, bus).await?];

                if category == Category::Libraries {
                    if let Some((containers, lists)) = &self.clients.lists {
                        let list_producer = libraries::ListBackupProducer::new(
                            tenant,
                            owner_id,
                            Arc::clone(containers),
                            Arc::clone(lists),
                            options.clone(),
                        );
                        backups.push(list_producer.collect(cancel, bus).await?);
                    }
                }

                Ok(backups)
            }

            Category::Mail | Category::Contacts | Category::Events => {
                let clients = match category {
                    Category::Mail => self.clients.mail.as_ref(),
                    Category::Contacts => self.clients.contacts.as_ref(),
                    _ => self.clients.events.as_ref(),
                }
                .ok_or_else(|| {
                    EngineError::Configuration(format!("no transport configured for {category}"))
                })?;

                let producer = MailboxBackupProducer::new(
                    tenant,
                    owner_id,
                    category,
                    Arc::clone(&clients.containers),
                    Arc::clone(&clients.items),
                    Arc::clone(matcher),
                    options.clone(),
                );

                Ok(vec![producer.collect(prior, cancel, bus).await?])
            }
        }
    }
}
