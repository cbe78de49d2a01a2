//! Change set loaders for JSON payloads and directory pairs.

use super::ChangeSet;
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories never scanned by [`DirectoryLoader`].
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".mergegate", "__pycache__"];

/// Files larger than this are left out of directory scans.
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// JSON representation of a change set.
///
/// ```json
/// {
///   "pr_title": "Fix login bug",
///   "pr_description": "Closes #12",
///   "changed_files": { "src/auth.py": "..." },
///   "previous_files": { "src/auth.py": "..." }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(default)]
    pub pr_title: String,
    #[serde(default)]
    pub pr_description: String,
    #[serde(default)]
    pub changed_files: BTreeMap<String, String>,
    #[serde(default)]
    pub previous_files: BTreeMap<String, String>,
}

impl ChangePayload {
    /// Read a payload file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GateError::changeset(format!("cannot read payload {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| GateError::changeset(format!("invalid payload: {}", e)))
    }

    #[must_use]
    pub fn into_change_set(self) -> ChangeSet {
        let mut changes = ChangeSet::new(self.pr_title, self.pr_description);
        for (path, content) in self.changed_files {
            changes.insert_changed(path, content);
        }
        for (path, content) in self.previous_files {
            changes.insert_previous(path, content);
        }
        changes
    }
}

impl From<&ChangeSet> for ChangePayload {
    fn from(changes: &ChangeSet) -> Self {
        Self {
            pr_title: changes.pr_title().to_string(),
            pr_description: changes.pr_description().to_string(),
            changed_files: changes.changed_files().clone(),
            previous_files: changes.previous_files().clone(),
        }
    }
}

/// Builds a change set by comparing two directory trees.
///
/// Files with identical content in both trees are not part of the change.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    new_dir: PathBuf,
    old_dir: Option<PathBuf>,
}

impl DirectoryLoader {
    #[must_use]
    pub fn new<P: AsRef<Path>>(new_dir: P) -> Self {
        Self {
            new_dir: new_dir.as_ref().to_path_buf(),
            old_dir: None,
        }
    }

    /// Tree holding the content before the change.
    #[must_use]
    pub fn with_previous<P: AsRef<Path>>(mut self, old_dir: P) -> Self {
        self.old_dir = Some(old_dir.as_ref().to_path_buf());
        self
    }

    pub fn load(&self, pr_title: &str, pr_description: &str) -> Result<ChangeSet> {
        let new_files = scan_tree(&self.new_dir)?;
        let old_files = match &self.old_dir {
            Some(dir) => scan_tree(dir)?,
            None => BTreeMap::new(),
        };

        let mut changes = ChangeSet::new(pr_title, pr_description);
        for (path, content) in &new_files {
            match old_files.get(path) {
                Some(old) if old == content => {}
                Some(old) => {
                    changes.insert_previous(path, old.clone());
                    changes.insert_changed(path, content.clone());
                }
                None => changes.insert_changed(path, content.clone()),
            }
        }
        for (path, content) in old_files {
            if !new_files.contains_key(&path) {
                changes.insert_previous(path, content);
            }
        }

        Ok(changes)
    }
}

fn scan_tree(root: &Path) -> Result<BTreeMap<String, String>> {
    if !root.is_dir() {
        return Err(GateError::changeset(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref())
        });

    for entry in walker {
        let entry = entry.map_err(|e| GateError::changeset(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_BYTES {
            tracing::debug!(path = %entry.path().display(), size, "Skipping large file");
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let bytes = std::fs::read(entry.path())?;
        files.insert(
            relative.to_string_lossy().replace('\\', "/"),
            String::from_utf8_lossy(&bytes).into_owned(),
        );
    }

    Ok(files)
}
