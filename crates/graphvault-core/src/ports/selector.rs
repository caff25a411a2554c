//! Folder selector port
//!
//! Scope evaluation happens outside the engine; enumeration only asks two
//! questions of whatever predicate it is handed.

/// Predicate over logical folder paths
pub trait FolderMatcher: Send + Sync {
    /// True when the selector includes everything
    fn is_any(&self) -> bool;

    /// True when the given folder path (display form, no repo prefix)
    /// is in scope
    fn matches(&self, folder_path: &str) -> bool;
}

/// Matches every folder
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyFolder;

impl FolderMatcher for AnyFolder {
    fn is_any(&self) -> bool {
        true
    }

    fn matches(&self, _folder_path: &str) -> bool {
        true
    }
}

/// Matches folders under any of a fixed set of path prefixes
#[derive(Debug, Clone, Default)]
pub struct PrefixMatcher {
    prefixes: Vec<String>,
}

impl PrefixMatcher {
    #[must_use]
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl FolderMatcher for PrefixMatcher {
    fn is_any(&self) -> bool {
        false
    }

    fn matches(&self, folder_path: &str) -> bool {
        self.prefixes.iter().any(|p| {
            folder_path == p
                || folder_path
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
