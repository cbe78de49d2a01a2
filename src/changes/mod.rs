//! Change sets: the unit of evaluation.
//!
//! A [`ChangeSet`] holds the PR metadata plus two path-to-content maps. A path
//! present in both maps is a modification, a path only in `previous_files` is
//! a deletion, and a path only in `changed_files` is an addition.
//!
//! Change sets can be built directly, from a JSON payload or two directory
//! trees ([`payload`]), or from a git working tree ([`git`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use mergegate::changes::{ChangeKind, ChangeSet};
//!
//! let changes = ChangeSet::new("Add login", "")
//!     .with_changed("src/auth.py", "def login(user): ...")
//!     .with_previous("src/legacy.py", "def old(): ...");
//!
//! assert_eq!(changes.change_kind("src/legacy.py"), Some(ChangeKind::Deleted));
//! ```

pub mod git;
pub mod payload;

pub use git::GitChangeSource;
pub use payload::{ChangePayload, DirectoryLoader};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a path differs between the previous and proposed trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// A proposed code change plus its PR metadata.
///
/// Deserialization goes through [`ChangePayload`], so paths are normalized
/// however the change set was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ChangePayload")]
pub struct ChangeSet {
    pr_title: String,
    pr_description: String,
    changed_files: BTreeMap<String, String>,
    previous_files: BTreeMap<String, String>,
}

impl From<ChangePayload> for ChangeSet {
    fn from(payload: ChangePayload) -> Self {
        payload.into_change_set()
    }
}

impl ChangeSet {
    /// Create an empty change set with PR metadata.
    #[must_use]
    pub fn new(pr_title: impl Into<String>, pr_description: impl Into<String>) -> Self {
        Self {
            pr_title: pr_title.into(),
            pr_description: pr_description.into(),
            changed_files: BTreeMap::new(),
            previous_files: BTreeMap::new(),
        }
    }

    /// Add a file's proposed content.
    #[must_use]
    pub fn with_changed(mut self, path: impl AsRef<str>, content: impl Into<String>) -> Self {
        self.insert_changed(path, content);
        self
    }

    /// Add a file's content prior to the change.
    #[must_use]
    pub fn with_previous(mut self, path: impl AsRef<str>, content: impl Into<String>) -> Self {
        self.insert_previous(path, content);
        self
    }

    pub fn insert_changed(&mut self, path: impl AsRef<str>, content: impl Into<String>) {
        self.changed_files
            .insert(normalize_path(path.as_ref()), content.into());
    }

    pub fn insert_previous(&mut self, path: impl AsRef<str>, content: impl Into<String>) {
        self.previous_files
            .insert(normalize_path(path.as_ref()), content.into());
    }

    #[must_use]
    pub fn pr_title(&self) -> &str {
        &self.pr_title
    }

    #[must_use]
    pub fn pr_description(&self) -> &str {
        &self.pr_description
    }

    /// Proposed content keyed by path, in path order.
    #[must_use]
    pub fn changed_files(&self) -> &BTreeMap<String, String> {
        &self.changed_files
    }

    /// Prior content keyed by path, in path order.
    #[must_use]
    pub fn previous_files(&self) -> &BTreeMap<String, String> {
        &self.previous_files
    }

    /// Proposed content of `path`, if the path exists after the change.
    #[must_use]
    pub fn content_of(&self, path: &str) -> Option<&str> {
        self.changed_files.get(path).map(String::as_str)
    }

    /// Content of `path` before the change, if it existed.
    #[must_use]
    pub fn previous_of(&self, path: &str) -> Option<&str> {
        self.previous_files.get(path).map(String::as_str)
    }

    /// Classify `path`, or `None` when it appears in neither map.
    #[must_use]
    pub fn change_kind(&self, path: &str) -> Option<ChangeKind> {
        match (
            self.changed_files.contains_key(path),
            self.previous_files.contains_key(path),
        ) {
            (true, true) => Some(ChangeKind::Modified),
            (true, false) => Some(ChangeKind::Added),
            (false, true) => Some(ChangeKind::Deleted),
            (false, false) => None,
        }
    }

    /// Paths only in `changed_files`.
    pub fn additions(&self) -> impl Iterator<Item = &str> {
        self.changed_files
            .keys()
            .filter(|p| !self.previous_files.contains_key(*p))
            .map(String::as_str)
    }

    /// Paths in both maps.
    pub fn modifications(&self) -> impl Iterator<Item = &str> {
        self.changed_files
            .keys()
            .filter(|p| self.previous_files.contains_key(*p))
            .map(String::as_str)
    }

    /// Paths only in `previous_files`.
    pub fn deletions(&self) -> impl Iterator<Item = &str> {
        self.previous_files
            .keys()
            .filter(|p| !self.changed_files.contains_key(*p))
            .map(String::as_str)
    }

    /// Every path touched by the change, sorted.
    #[must_use]
    pub fn all_paths(&self) -> BTreeSet<&str> {
        self.changed_files
            .keys()
            .chain(self.previous_files.keys())
            .map(String::as_str)
            .collect()
    }

    /// Number of distinct paths touched by the change.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.all_paths().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty() && self.previous_files.is_empty()
    }

    /// Lines of the proposed content of `path` that do not occur in its
    /// previous content, with their 1-based line numbers.
    ///
    /// For an added file every line counts as added.
    #[must_use]
    pub fn added_lines(&self, path: &str) -> Vec<(usize, &str)> {
        let Some(new) = self.content_of(path) else {
            return Vec::new();
        };
        let old: BTreeSet<&str> = self
            .previous_of(path)
            .map(|c| c.lines().map(str::trim_end).collect())
            .unwrap_or_default();

        new.lines()
            .enumerate()
            .filter(|(_, line)| !old.contains(line.trim_end()))
            .map(|(idx, line)| (idx + 1, line))
            .collect()
    }
}

/// Normalise a repository-relative path: forward slashes, no leading `./`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.trim_start_matches('/').to_string()
}
