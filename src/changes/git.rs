//! Building change sets from a git working tree.
//!
//! The working tree (including untracked files) is compared against a base
//! ref. Proposed content is read from disk, prior content with `git show`.

use super::{normalize_path, ChangeSet};
use crate::error::{GateError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::process::Command;

/// One line of `git diff --name-status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameStatus {
    Added(String),
    Modified(String),
    Deleted(String),
    /// Renames are treated as a deletion of `from` plus an addition of `to`.
    Renamed { from: String, to: String },
}

/// Reads a [`ChangeSet`] out of a git repository.
#[derive(Debug, Clone)]
pub struct GitChangeSource {
    repo_path: PathBuf,
    exclude: Vec<String>,
}

impl GitChangeSource {
    #[must_use]
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            exclude: Vec::new(),
        }
    }

    /// Skip paths matching any of these globs.
    #[must_use]
    pub fn with_exclude(mut self, patterns: &[&str]) -> Self {
        self.exclude = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Collect every change between `base` and the working tree.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Git`] when the path is not a repository, the base
    /// ref does not resolve, or a git command fails.
    pub fn collect(&self, base: &str, pr_title: &str, pr_description: &str) -> Result<ChangeSet> {
        let excluded = self.exclude_set()?;
        let mut entries = self.diff_entries(base)?;
        entries.extend(
            self.untracked_files()?
                .into_iter()
                .map(NameStatus::Added),
        );

        let mut changes = ChangeSet::new(pr_title, pr_description);
        for entry in entries {
            match entry {
                NameStatus::Added(path) => {
                    if !excluded.is_match(&path) {
                        changes.insert_changed(&path, self.read_worktree(&path)?);
                    }
                }
                NameStatus::Modified(path) => {
                    if !excluded.is_match(&path) {
                        changes.insert_previous(&path, self.show(base, &path)?);
                        changes.insert_changed(&path, self.read_worktree(&path)?);
                    }
                }
                NameStatus::Deleted(path) => {
                    if !excluded.is_match(&path) {
                        changes.insert_previous(&path, self.show(base, &path)?);
                    }
                }
                NameStatus::Renamed { from, to } => {
                    if !excluded.is_match(&from) {
                        changes.insert_previous(&from, self.show(base, &from)?);
                    }
                    if !excluded.is_match(&to) {
                        changes.insert_changed(&to, self.read_worktree(&to)?);
                    }
                }
            }
        }

        tracing::debug!(
            base = base,
            files = changes.file_count(),
            "Collected change set from git"
        );
        Ok(changes)
    }

    fn diff_entries(&self, base: &str) -> Result<Vec<NameStatus>> {
        let stdout = self.git("diff", &["diff", "--name-status", "--diff-filter=ACDMR", "-M", base])?;
        Ok(parse_name_status(&stdout))
    }

    fn untracked_files(&self) -> Result<Vec<String>> {
        let stdout = self.git("ls-files", &["ls-files", "--others", "--exclude-standard"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(normalize_path)
            .collect())
    }

    fn show(&self, base: &str, path: &str) -> Result<String> {
        self.git("show", &["show", &format!("{}:{}", base, path)])
    }

    fn read_worktree(&self, path: &str) -> Result<String> {
        let bytes = std::fs::read(self.repo_path.join(path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn git(&self, operation: &str, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GateError::git(operation, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GateError::git(operation, stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            let glob = Glob::new(pattern)
                .map_err(|e| GateError::invalid_config("exclude", e.to_string()))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| GateError::invalid_config("exclude", e.to_string()))
    }
}

/// Parse `git diff --name-status` output.
///
/// Copies are treated as additions of the destination path.
#[must_use]
pub fn parse_name_status(output: &str) -> Vec<NameStatus> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.trim().split('\t').collect();
            let status = parts.first()?.chars().next()?;
            match (status, parts.len()) {
                ('A', 2..) => Some(NameStatus::Added(normalize_path(parts[1]))),
                ('M', 2..) => Some(NameStatus::Modified(normalize_path(parts[1]))),
                ('D', 2..) => Some(NameStatus::Deleted(normalize_path(parts[1]))),
                ('R', 3..) => Some(NameStatus::Renamed {
                    from: normalize_path(parts[1]),
                    to: normalize_path(parts[2]),
                }),
                ('C', 3..) => Some(NameStatus::Added(normalize_path(parts[2]))),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangeKind;
    use crate::testing::TestRepo;

    // =========================================================================
    // Parse Output Tests
    // =========================================================================

    #[test]
    fn test_parse_name_status_kinds() {
        let output = "M\tsrc/main.rs\nA\tnew.py\nD\told.py\n";
        let entries = parse_name_status(output);
        assert_eq!(
            entries,
            vec![
                NameStatus::Modified("src/main.rs".into()),
                NameStatus::Added("new.py".into()),
                NameStatus::Deleted("old.py".into()),
            ]
        );
    }

    #[test]
    fn test_parse_name_status_rename_and_copy() {
        let output = "R100\told_name.rs\tnew_name.rs\nC75\ta.rs\tb.rs\n";
        let entries = parse_name_status(output);
        assert_eq!(
            entries[0],
            NameStatus::Renamed {
                from: "old_name.rs".into(),
                to: "new_name.rs".into()
            }
        );
        assert_eq!(entries[1], NameStatus::Added("b.rs".into()));
    }

    #[test]
    fn test_parse_name_status_ignores_garbage() {
        assert!(parse_name_status("").is_empty());
        assert!(parse_name_status("M\n\nX\tfoo\n").is_empty());
    }

    // =========================================================================
    // Repository Tests
    // =========================================================================

    #[test]
    fn test_collect_from_working_tree() {
        let repo = TestRepo::with_git_repo();
        repo.write_file("app/service.py", "def run():\n    return 1\n");
        repo.write_file("app/legacy.py", "def old():\n    pass\n");
        repo.make_commit("Base");
        let base = repo.head();

        repo.write_file("app/service.py", "def run():\n    return 2\n");
        repo.write_file("app/added.py", "def new():\n    pass\n");
        repo.remove_file("app/legacy.py");

        let changes = GitChangeSource::new(repo.path())
            .collect(&base, "Update service", "")
            .unwrap();

        assert_eq!(changes.change_kind("app/service.py"), Some(ChangeKind::Modified));
        assert_eq!(changes.change_kind("app/added.py"), Some(ChangeKind::Added));
        assert_eq!(changes.change_kind("app/legacy.py"), Some(ChangeKind::Deleted));
        assert!(changes.previous_of("app/service.py").unwrap().contains("return 1"));
        assert!(changes.content_of("app/service.py").unwrap().contains("return 2"));
    }

    #[test]
    fn test_collect_honours_exclude() {
        let repo = TestRepo::with_git_repo();
        let base = repo.head();
        repo.write_file("vendor/lib.py", "x = 1\n");
        repo.write_file("src/main.py", "x = 2\n");

        let changes = GitChangeSource::new(repo.path())
            .with_exclude(&["vendor/**"])
            .collect(&base, "t", "")
            .unwrap();

        assert!(changes.content_of("src/main.py").is_some());
        assert!(changes.content_of("vendor/lib.py").is_none());
    }

    #[test]
    fn test_collect_bad_ref_is_git_error() {
        let repo = TestRepo::with_git_repo();
        let err = GitChangeSource::new(repo.path())
            .collect("no-such-ref", "t", "")
            .unwrap_err();
        assert!(matches!(err, GateError::Git { .. }));
    }
}
