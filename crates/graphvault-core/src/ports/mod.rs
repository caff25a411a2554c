//! Port definitions (hexagonal boundaries)
//!
//! - `transport`: capability traits the graph adapter implements
//! - `store`: the collection interface the snapshot store consumes
//! - `selector`: the folder predicate evaluated during enumeration

pub mod selector;
pub mod store;
pub mod transport;

pub use selector::{AnyFolder, FolderMatcher, PrefixMatcher};
pub use store::{BackupCollection, BackupItem, InfoKind, ItemInfo, LazyData, PrevRef, PrevRefs};
pub use transport::{
    AddedAndRemoved, ContainerClient, ContainerInfo, DeltaPage, Drive, DriveClient, DriveItem,
    ItemPager, ListClient, MailboxClient, ParentRef, Permission,
};
