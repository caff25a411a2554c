//! Repo paths and path builders
//!
//! Every persisted object lives under a canonical storage path of the form
//! `<tenant>/<service>/<owner>/<category>/<container elements...>`, with an
//! optional trailing item element. Path elements are escaped when rendered so
//! that a display name containing `/` cannot corrupt the hierarchy, and the
//! escaped string form is what gets persisted in the metadata maps and used
//! for prefix substitution during subtree moves.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::EngineError;

/// Number of hex characters kept from the digest for a short-ref
const SHORT_REF_LEN: usize = 12;

// ============================================================================
// Service and Category
// ============================================================================

/// The backend service a category belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Exchange,
    OneDrive,
    SharePoint,
}

impl Service {
    /// Stable identifier used in storage paths
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::OneDrive => "onedrive",
            Self::SharePoint => "sharepoint",
        }
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The data category a backup run enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Mail,
    Contacts,
    Events,
    Files,
    Libraries,
}

impl Category {
    /// Stable identifier used in storage paths
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Contacts => "contacts",
            Self::Events => "events",
            Self::Files => "files",
            Self::Libraries => "libraries",
        }
    }

    /// The service this category is enumerated from
    #[must_use]
    pub fn service(self) -> Service {
        match self {
            Self::Mail | Self::Contacts | Self::Events => Service::Exchange,
            Self::Files => Service::OneDrive,
            Self::Libraries => Service::SharePoint,
        }
    }

    /// True for categories enumerated via drive deltas rather than
    /// per-container deltas
    #[must_use]
    pub fn is_drive_based(self) -> bool {
        matches!(self, Self::Files | Self::Libraries)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Element escaping
// ============================================================================

fn escape_element(elem: &str) -> String {
    let mut out = String::with_capacity(elem.len());
    for c in elem.chars() {
        if c == '\\' || c == '/' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Splits an escaped path string back into raw elements
///
/// # Errors
/// Returns `EngineError::InvalidPath` on a trailing bare escape character
fn split_escaped(s: &str) -> Result<Vec<String>, EngineError> {
    let mut elems = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' => escaped = true,
            '/' => {
                if !current.is_empty() {
                    elems.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if escaped {
        return Err(EngineError::InvalidPath(format!(
            "trailing escape character in {s:?}"
        )));
    }

    if !current.is_empty() {
        elems.push(current);
    }

    Ok(elems)
}

fn join_escaped(elems: &[String]) -> String {
    elems
        .iter()
        .map(|e| escape_element(e))
        .collect::<Vec<_>>()
        .join("/")
}

/// Short, stable reference for a rendered path; used as a merge key
/// between the engine and the store
#[must_use]
pub fn short_ref_of(rendered: &str) -> String {
    let digest = Sha256::digest(rendered.as_bytes());
    let mut out = String::with_capacity(SHORT_REF_LEN);
    for byte in digest.iter() {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= SHORT_REF_LEN {
            break;
        }
    }
    out.truncate(SHORT_REF_LEN);
    out
}

// ============================================================================
// PathBuilder
// ============================================================================

/// An ordered list of raw (unescaped) path elements
///
/// Builders are how the resolver assembles storage and display paths before
/// they are anchored to a tenant/owner prefix. Empty elements are dropped on
/// append, matching the server's tolerance for stray slashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathBuilder {
    elems: Vec<String>,
}

impl PathBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder from raw elements; empties are dropped
    pub fn from_elements<I, S>(elems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let elems = elems
            .into_iter()
            .map(Into::into)
            .filter(|e| !e.is_empty())
            .collect();
        Self { elems }
    }

    /// Parse an escaped string form back into a builder
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` if the escaping is malformed
    pub fn from_escaped(s: &str) -> Result<Self, EngineError> {
        Ok(Self {
            elems: split_escaped(s)?,
        })
    }

    /// Returns a new builder with the element appended
    #[must_use]
    pub fn append(&self, elem: impl Into<String>) -> Self {
        let mut next = self.clone();
        let elem = elem.into();
        if !elem.is_empty() {
            next.elems.push(elem);
        }
        next
    }

    /// Returns a new builder with all elements appended
    #[must_use]
    pub fn append_all<I, S>(&self, elems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.elems
            .extend(elems.into_iter().map(Into::into).filter(|e| !e.is_empty()));
        next
    }

    /// The parent builder (all elements but the last)
    #[must_use]
    pub fn dir(&self) -> Self {
        let mut next = self.clone();
        next.elems.pop();
        next
    }

    /// Returns a new builder with the first element removed
    #[must_use]
    pub fn pop_front(&self) -> Self {
        if self.elems.is_empty() {
            return self.clone();
        }
        Self {
            elems: self.elems[1..].to_vec(),
        }
    }

    #[must_use]
    pub fn last_elem(&self) -> Option<&str> {
        self.elems.last().map(String::as_str)
    }

    #[must_use]
    pub fn elements(&self) -> &[String] {
        &self.elems
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Short-ref of the escaped string form
    #[must_use]
    pub fn short_ref(&self) -> String {
        short_ref_of(&self.to_string())
    }
}

impl Display for PathBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", join_escaped(&self.elems))
    }
}

// ============================================================================
// RepoPath
// ============================================================================

/// A fully-anchored storage path:
/// `<tenant>/<service>/<owner>/<category>/<folders...>[/<item>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoPath {
    tenant: String,
    service: Service,
    owner: String,
    category: Category,
    folders: Vec<String>,
    item: Option<String>,
}

impl RepoPath {
    /// Build a container path from raw folder elements
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` if tenant or owner is empty
    pub fn build<I, S>(
        tenant: impl Into<String>,
        owner: impl Into<String>,
        category: Category,
        folders: I,
    ) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tenant = tenant.into();
        let owner = owner.into();

        if tenant.is_empty() {
            return Err(EngineError::InvalidPath("tenant cannot be empty".into()));
        }
        if owner.is_empty() {
            return Err(EngineError::InvalidPath("owner cannot be empty".into()));
        }

        Ok(Self {
            tenant,
            service: category.service(),
            owner,
            category,
            folders: folders
                .into_iter()
                .map(Into::into)
                .filter(|e: &String| !e.is_empty())
                .collect(),
            item: None,
        })
    }

    /// Parse the escaped string form back into a path
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` if fewer than four leading segments
    /// are present, or if the service/category segments are unknown
    pub fn from_data_layer(s: &str, is_item: bool) -> Result<Self, EngineError> {
        let mut elems = split_escaped(s)?;

        if elems.len() < 4 {
            return Err(EngineError::InvalidPath(format!(
                "path {s:?} is missing tenant/service/owner/category segments"
            )));
        }

        let rest = elems.split_off(4);
        let category = match elems[3].as_str() {
            "mail" => Category::Mail,
            "contacts" => Category::Contacts,
            "events" => Category::Events,
            "files" => Category::Files,
            "libraries" => Category::Libraries,
            other => {
                return Err(EngineError::InvalidPath(format!(
                    "unknown category segment {other:?}"
                )))
            }
        };

        if elems[1] != category.service().as_str() {
            return Err(EngineError::InvalidPath(format!(
                "service segment {:?} does not match category {category}",
                elems[1]
            )));
        }

        let mut path = Self::build(elems[0].clone(), elems[2].clone(), category, rest)?;

        if is_item {
            let Some(item) = path.folders.pop() else {
                return Err(EngineError::InvalidPath(format!(
                    "item path {s:?} has no item element"
                )));
            };
            path.item = Some(item);
        }

        Ok(path)
    }

    /// Append an element, producing an item path or a deeper container path
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` for an empty element, or when
    /// appending below an item path
    pub fn append(&self, elem: impl Into<String>, is_item: bool) -> Result<Self, EngineError> {
        let elem = elem.into();
        if elem.is_empty() {
            return Err(EngineError::InvalidPath(
                "cannot append an empty element".into(),
            ));
        }
        if self.item.is_some() {
            return Err(EngineError::InvalidPath(
                "cannot append below an item path".into(),
            ));
        }

        let mut next = self.clone();
        if is_item {
            next.item = Some(elem);
        } else {
            next.folders.push(elem);
        }
        Ok(next)
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn service(&self) -> Service {
        self.service
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Raw folder elements below the category segment
    #[must_use]
    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    /// The trailing item element, if this is an item path
    #[must_use]
    pub fn item(&self) -> Option<&str> {
        self.item.as_deref()
    }

    /// Folder elements as a builder, without the anchoring prefix
    #[must_use]
    pub fn folder_builder(&self) -> PathBuilder {
        PathBuilder::from_elements(self.folders.iter().cloned())
    }

    /// The logical folder path without the anchoring prefix, escaped
    #[must_use]
    pub fn folder_path(&self) -> String {
        join_escaped(&self.folders)
    }

    /// Folder path inside a drive, with the `drives/<id>/root:` prefix
    /// stripped. Empty for the drive root itself.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPath` if the path does not carry the
    /// drive anchor elements
    pub fn drive_folder_path(&self) -> Result<String, EngineError> {
        if self.folders.len() < 3 || self.folders[0] != "drives" || self.folders[2] != "root:" {
            return Err(EngineError::InvalidPath(format!(
                "path {self} is not anchored to a drive root"
            )));
        }
        Ok(join_escaped(&self.folders[3..]))
    }

    /// Short-ref of the rendered path
    #[must_use]
    pub fn short_ref(&self) -> String {
        short_ref_of(&self.to_string())
    }

    /// Rewrites this path when it sits under `prev`, substituting `next`
    /// for that prefix. Returns true when a rewrite happened.
    pub fn update_parent(&mut self, prev: &Self, next: &Self) -> bool {
        if self.tenant != prev.tenant
            || self.owner != prev.owner
            || self.category != prev.category
            || self.folders.len() < prev.folders.len()
            || self.folders[..prev.folders.len()] != prev.folders[..]
        {
            return false;
        }

        let tail = self.folders[prev.folders.len()..].to_vec();
        self.folders = next.folders.clone();
        self.folders.extend(tail);
        self.tenant = next.tenant.clone();
        self.owner = next.owner.clone();
        self.category = next.category;
        self.service = next.service;
        true
    }
}

impl Display for RepoPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            escape_element(&self.tenant),
            self.service.as_str(),
            escape_element(&self.owner),
            self.category.as_str()
        )?;
        if !self.folders.is_empty() {
            write!(f, "/{}", join_escaped(&self.folders))?;
        }
        if let Some(item) = &self.item {
            write!(f, "/{}", escape_element(item))?;
        }
        Ok(())
    }
}

/// Boundary-aware prefix substitution on escaped path strings
///
/// Returns the rewritten string when `value` equals `old` or sits strictly
/// below it; `None` otherwise. Matching respects element boundaries so that
/// `a/b` never matches `a/bc`.
#[must_use]
pub fn replace_path_prefix(value: &str, old: &str, new: &str) -> Option<String> {
    if value == old {
        return Some(new.to_string());
    }

    let rest = value.strip_prefix(old)?;
    if !rest.starts_with('/') {
        return None;
    }

    Some(format!("{new}{rest}"))
}
