//! Append-only ledger of human overrides.
//!
//! An override tells the gate to stop counting a rule (optionally restricted
//! to one file) against the verdict. Findings stay in the report; only their
//! blocking effect is removed.
//!
//! # Features
//!
//! - **Append-only**: entries are never edited or removed; a later entry for
//!   the same key supersedes earlier ones for evaluation only
//! - **Tamper-evident**: each entry carries the SHA-256 hash of its
//!   predecessor
//! - **Durable**: [`OverrideLedger::open`] backs the ledger with a JSONL file
//!   guarded by an exclusive file lock
//!
//! # Example
//!
//! ```rust,ignore
//! use mergegate::ledger::{OverrideLedger, OverrideRequest};
//!
//! let ledger = OverrideLedger::open(".mergegate/overrides.jsonl")?;
//! ledger.record(
//!     OverrideRequest::new("sql-injection", "alice", justification)
//!         .for_file("src/report.py"),
//! )?;
//! assert!(ledger.verify().is_valid);
//! ```

use crate::changes::normalize_path;
use crate::error::{GateError, Result};
use crate::finding::Finding;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Shortest justification accepted, in characters.
pub const MIN_JUSTIFICATION_LEN: usize = 50;

/// Previous-hash value of the first entry.
const GENESIS: &str = "mergegate-ledger-genesis-v1";

fn genesis_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// Keys and requests
// ============================================================================

/// What an override applies to: a rule, optionally narrowed to one file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OverrideKey {
    pub rule_id: String,
    pub file_path: Option<String>,
}

impl OverrideKey {
    /// Whether a finding is covered by this key.
    #[must_use]
    pub fn matches(&self, finding: &Finding) -> bool {
        self.rule_id == finding.rule_id()
            && self
                .file_path
                .as_deref()
                .is_none_or(|path| path == finding.file_path())
    }
}

impl std::fmt::Display for OverrideKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file_path {
            Some(path) => write!(f, "{} @ {}", self.rule_id, path),
            None => write!(f, "{} (all files)", self.rule_id),
        }
    }
}

/// An override submission, not yet accepted.
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    rule_id: String,
    file_path: Option<String>,
    justification: String,
    author: String,
    timestamp: Option<DateTime<Utc>>,
}

impl OverrideRequest {
    pub fn new(
        rule_id: impl Into<String>,
        author: impl Into<String>,
        justification: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            file_path: None,
            justification: justification.into(),
            author: author.into(),
            timestamp: None,
        }
    }

    /// Restrict the override to one file. An empty path means all files.
    #[must_use]
    pub fn for_file(mut self, file_path: impl AsRef<str>) -> Self {
        let path = normalize_path(file_path.as_ref());
        self.file_path = (!path.is_empty()).then_some(path);
        self
    }

    /// Pin the timestamp instead of using the current time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn check(&self) -> Result<()> {
        if self.rule_id.trim().is_empty() {
            return Err(GateError::validation("rule_id must not be empty"));
        }
        if self.author.trim().is_empty() {
            return Err(GateError::validation("author must not be empty"));
        }
        let length = self.justification.trim().chars().count();
        if length < MIN_JUSTIFICATION_LEN {
            return Err(GateError::validation(format!(
                "justification must be at least {} characters (got {})",
                MIN_JUSTIFICATION_LEN, length
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Entries
// ============================================================================

/// An accepted override, chained to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub id: Uuid,
    /// Position in the ledger, starting at 0.
    pub sequence: u64,
    pub rule_id: String,
    pub file_path: Option<String>,
    pub justification: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of the previous entry (hex), or of the genesis string.
    pub previous_hash: String,
    /// Hash of every other field (hex).
    pub hash: String,
}

impl OverrideEntry {
    #[must_use]
    pub fn key(&self) -> OverrideKey {
        OverrideKey {
            rule_id: self.rule_id.clone(),
            file_path: self.file_path.clone(),
        }
    }

    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.rule_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.file_path.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0]);
        hasher.update(self.justification.as_bytes());
        hasher.update([0]);
        hasher.update(self.author.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }

    #[must_use]
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    fn from_request(request: OverrideRequest, sequence: u64, previous_hash: String) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            sequence,
            rule_id: request.rule_id.trim().to_string(),
            file_path: request.file_path,
            justification: request.justification,
            author: request.author.trim().to_string(),
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }
}

/// Result of checking the hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub entries_verified: u64,
    pub first_invalid_entry: Option<u64>,
    pub error_description: Option<String>,
}

impl VerificationResult {
    #[must_use]
    pub fn valid(entries_verified: u64) -> Self {
        Self {
            is_valid: true,
            entries_verified,
            first_invalid_entry: None,
            error_description: None,
        }
    }

    #[must_use]
    pub fn invalid(entries_verified: u64, invalid_entry: u64, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            entries_verified,
            first_invalid_entry: Some(invalid_entry),
            error_description: Some(error.into()),
        }
    }
}

/// Check sequence numbers, entry hashes and chain links.
#[must_use]
pub fn verify_chain(entries: &[OverrideEntry]) -> VerificationResult {
    let genesis = genesis_hash();

    for (i, entry) in entries.iter().enumerate() {
        let index = i as u64;
        if entry.sequence != index {
            return VerificationResult::invalid(
                index,
                entry.sequence,
                format!("Sequence mismatch: expected {}, got {}", index, entry.sequence),
            );
        }

        if !entry.verify_hash() {
            return VerificationResult::invalid(index, entry.sequence, "Entry hash verification failed");
        }

        let expected_previous = if i == 0 { &genesis } else { &entries[i - 1].hash };
        if entry.previous_hash != *expected_previous {
            return VerificationResult::invalid(
                index,
                entry.sequence,
                "Chain hash mismatch: previous_hash doesn't match",
            );
        }
    }

    VerificationResult::valid(entries.len() as u64)
}

// ============================================================================
// Ledger
// ============================================================================

/// The override ledger.
///
/// Readers take snapshots under a read lock and never observe a partially
/// appended entry. Appends are serialised by the write lock and, when the
/// ledger is file-backed, by an exclusive lock on the file.
#[derive(Debug, Default)]
pub struct OverrideLedger {
    entries: RwLock<Vec<OverrideEntry>>,
    path: Option<PathBuf>,
}

impl OverrideLedger {
    /// A ledger that lives only as long as this value.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed ledger, loading existing entries.
    ///
    /// The file and its parent directory are created on the first append.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if its hash
    /// chain does not verify.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        ensure_intact(&entries)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened override ledger");
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Accept an override and append it.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Validation`] when the rule id or author is empty,
    /// or the justification is shorter than [`MIN_JUSTIFICATION_LEN`]. The
    /// ledger is unchanged in that case. I/O failures on a file-backed ledger
    /// also leave the in-memory ledger unchanged.
    pub fn record(&self, request: OverrideRequest) -> Result<OverrideEntry> {
        request.check()?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let Some(path) = &self.path else {
            let entry = next_entry(&entries, request);
            entries.push(entry.clone());
            return Ok(entry);
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        FileExt::lock_exclusive(&file).map_err(|e| {
            GateError::Other(anyhow::anyhow!("Failed to acquire ledger lock: {e}"))
        })?;

        // Another process may have appended since we loaded, or the file
        // may have been edited. Never chain onto a broken history.
        let on_disk = match read_entries(path).and_then(|on_disk| {
            ensure_intact(&on_disk)?;
            Ok(on_disk)
        }) {
            Ok(on_disk) => on_disk,
            Err(e) => {
                release_lock(&file);
                return Err(e);
            }
        };
        if on_disk.len() > entries.len() {
            *entries = on_disk;
        }

        let entry = next_entry(&entries, request);
        let line = serde_json::to_string(&entry)?;
        let written = writeln!(file, "{}", line).and_then(|()| file.sync_data());
        release_lock(&file);
        written?;

        entries.push(entry.clone());
        tracing::info!(
            rule_id = %entry.rule_id,
            file_path = entry.file_path.as_deref().unwrap_or("*"),
            author = %entry.author,
            sequence = entry.sequence,
            "Override recorded"
        );
        Ok(entry)
    }

    /// The latest entry for every key.
    #[must_use]
    pub fn current_overrides(&self) -> BTreeMap<OverrideKey, OverrideEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|entry| (entry.key(), entry.clone()))
            .collect()
    }

    /// Every entry in append order.
    #[must_use]
    pub fn history(&self) -> Vec<OverrideEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the in-memory hash chain.
    #[must_use]
    pub fn verify(&self) -> VerificationResult {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        verify_chain(&entries)
    }

    /// Check a ledger file without loading it as a ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or an entry does not parse.
    pub fn verify_file(path: impl AsRef<Path>) -> Result<VerificationResult> {
        Ok(verify_chain(&read_entries(path.as_ref())?))
    }
}

fn ensure_intact(entries: &[OverrideEntry]) -> Result<()> {
    let verification = verify_chain(entries);
    if verification.is_valid {
        return Ok(());
    }
    Err(GateError::LedgerCorrupt {
        sequence: verification.first_invalid_entry.unwrap_or_default(),
        reason: verification.error_description.unwrap_or_default(),
    })
}

fn release_lock(file: &File) {
    if let Err(e) = FileExt::unlock(file) {
        tracing::warn!(error = %e, "Failed to release ledger lock");
    }
}

fn next_entry(entries: &[OverrideEntry], request: OverrideRequest) -> OverrideEntry {
    let previous_hash = entries
        .last()
        .map_or_else(genesis_hash, |last| last.hash.clone());
    OverrideEntry::from_request(request, entries.len() as u64, previous_hash)
}

fn read_entries(path: &Path) -> Result<Vec<OverrideEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut entries = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: OverrideEntry = serde_json::from_str(&line).map_err(|e| GateError::LedgerCorrupt {
            sequence: entries.len() as u64,
            reason: format!("line {}: {}", line_num + 1, e),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Category, Severity};
    use tempfile::TempDir;

    const REASON: &str = "Reviewed with the security team; the query runs on a fixed allow-list.";

    #[test]
    fn test_record_and_current_overrides() {
        let ledger = OverrideLedger::in_memory();
        let entry = ledger
            .record(OverrideRequest::new("sql-injection", "alice", REASON).for_file("./src/db.py"))
            .unwrap();

        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.file_path.as_deref(), Some("src/db.py"));
        assert_eq!(ledger.len(), 1);

        let current = ledger.current_overrides();
        let key = OverrideKey {
            rule_id: "sql-injection".into(),
            file_path: Some("src/db.py".into()),
        };
        assert_eq!(current.get(&key).unwrap().author, "alice");
    }

    #[test]
    fn test_short_justification_rejected_and_ledger_unchanged() {
        let ledger = OverrideLedger::in_memory();
        let err = ledger
            .record(OverrideRequest::new("sql-injection", "alice", "trust me"))
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("at least 50"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_justification_length_boundary() {
        let ledger = OverrideLedger::in_memory();
        assert!(ledger
            .record(OverrideRequest::new("r", "bob", "x".repeat(49)))
            .is_err());
        assert!(ledger
            .record(OverrideRequest::new("r", "bob", "x".repeat(50)))
            .is_ok());
    }

    #[test]
    fn test_empty_rule_or_author_rejected() {
        let ledger = OverrideLedger::in_memory();
        assert!(ledger.record(OverrideRequest::new(" ", "alice", REASON)).is_err());
        assert!(ledger.record(OverrideRequest::new("rule", "", REASON)).is_err());
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn test_later_entry_supersedes_but_history_kept() {
        let ledger = OverrideLedger::in_memory();
        ledger.record(OverrideRequest::new("timeout", "alice", REASON)).unwrap();
        ledger.record(OverrideRequest::new("timeout", "bob", REASON)).unwrap();

        let current = ledger.current_overrides();
        assert_eq!(current.len(), 1);
        assert_eq!(current.values().next().unwrap().author, "bob");
        assert_eq!(ledger.history().len(), 2);
    }

    #[test]
    fn test_key_matching() {
        let finding = Finding::new(Category::Security, Severity::Critical, "sql-injection", "m")
            .with_location("src/db.py", 3);
        let global = OverrideKey {
            rule_id: "sql-injection".into(),
            file_path: None,
        };
        let scoped = OverrideKey {
            rule_id: "sql-injection".into(),
            file_path: Some("src/other.py".into()),
        };
        assert!(global.matches(&finding));
        assert!(!scoped.matches(&finding));
    }

    #[test]
    fn test_chain_verifies_and_detects_tampering() {
        let ledger = OverrideLedger::in_memory();
        ledger.record(OverrideRequest::new("a", "alice", REASON)).unwrap();
        ledger.record(OverrideRequest::new("b", "alice", REASON)).unwrap();
        assert!(ledger.verify().is_valid);

        let mut entries = ledger.history();
        entries[0].author = "mallory".into();
        let result = verify_chain(&entries);
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(0));
    }

    #[test]
    fn test_file_backed_ledger_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/overrides.jsonl");

        {
            let ledger = OverrideLedger::open(&path).unwrap();
            ledger.record(OverrideRequest::new("a", "alice", REASON)).unwrap();
            ledger.record(OverrideRequest::new("b", "bob", REASON)).unwrap();
        }

        let reopened = OverrideLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.verify().is_valid);
        assert!(OverrideLedger::verify_file(&path).unwrap().is_valid);
    }

    #[test]
    fn test_two_handles_share_one_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overrides.jsonl");

        let first = OverrideLedger::open(&path).unwrap();
        let second = OverrideLedger::open(&path).unwrap();
        first.record(OverrideRequest::new("a", "alice", REASON)).unwrap();
        let entry = second.record(OverrideRequest::new("b", "bob", REASON)).unwrap();

        assert_eq!(entry.sequence, 1);
        assert!(OverrideLedger::verify_file(&path).unwrap().is_valid);
    }

    #[test]
    fn test_open_rejects_tampered_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overrides.jsonl");
        {
            let ledger = OverrideLedger::open(&path).unwrap();
            ledger.record(OverrideRequest::new("a", "alice", REASON)).unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("alice", "mallory")).unwrap();

        let err = OverrideLedger::open(&path).unwrap_err();
        assert!(matches!(err, GateError::LedgerCorrupt { sequence: 0, .. }));
    }

    #[test]
    fn test_record_refuses_file_edited_after_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overrides.jsonl");
        let ledger = OverrideLedger::open(&path).unwrap();
        ledger.record(OverrideRequest::new("a", "alice", REASON)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("alice", "mallory")).unwrap();

        let err = ledger
            .record(OverrideRequest::new("b", "bob", REASON))
            .unwrap_err();
        assert!(matches!(err, GateError::LedgerCorrupt { sequence: 0, .. }));
        assert_eq!(ledger.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
