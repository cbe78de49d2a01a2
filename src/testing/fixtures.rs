//! Test fixtures for creating reproducible test environments.

use crate::changes::ChangeSet;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// A temporary git repository.
///
/// Automatically cleans up when dropped.
pub struct TestRepo {
    temp_dir: TempDir,
}

impl TestRepo {
    /// Create a repository with one initial commit.
    ///
    /// # Panics
    ///
    /// Panics if git initialization fails.
    #[must_use]
    pub fn with_git_repo() -> Self {
        let repo = Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        };
        repo.git(&["init", "-q"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.write_file("README.md", "# fixture\n");
        repo.make_commit("Initial commit");
        repo
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_file(&self, relative_path: &str, content: &str) {
        let path = self.temp_dir.path().join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// # Panics
    ///
    /// Panics if the file cannot be removed.
    pub fn remove_file(&self, relative_path: &str) {
        std::fs::remove_file(self.temp_dir.path().join(relative_path))
            .expect("Failed to remove file");
    }

    /// Stage everything and commit.
    pub fn make_commit(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message, "--allow-empty"]);
    }

    /// Current commit hash.
    #[must_use]
    pub fn head(&self) -> String {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(self.temp_dir.path())
            .output()
            .expect("Failed to get commit hash");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.temp_dir.path())
            .output()
            .expect("Failed to run git")
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }
}

// ============================================================================
// Change set fixtures
// ============================================================================

/// A Python change that concatenates user input into SQL.
#[must_use]
pub fn sql_injection_change() -> ChangeSet {
    ChangeSet::new("Add user lookup", "").with_changed(
        "app/users.py",
        "def find_user(cursor, name):\n    cursor.execute(\"SELECT * FROM users WHERE name = '\" + name + \"'\")\n",
    )
}

/// A JavaScript change that adds a required parameter to a public function.
#[must_use]
pub fn signature_change() -> ChangeSet {
    ChangeSet::new("Require email", "")
        .with_previous("api/users.js", "export function getUser(id) {\n  return db.find(id);\n}\n")
        .with_changed(
            "api/users.js",
            "export function getUser(id, email) {\n  return db.find(id, email);\n}\n",
        )
}

/// A change with nothing for any validator to report.
#[must_use]
pub fn clean_change() -> ChangeSet {
    ChangeSet::new("Update docs", "Wording only").with_changed("docs/guide.md", "# Guide\n\nHello.\n")
}
