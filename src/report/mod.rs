//! Evaluation results.
//!
//! A [`QualityReport`] keeps every finding the validators produced, in
//! registration order then discovery order. Overrides mark entries as
//! suppressed but never remove them.

pub mod render;

pub use render::{render_json, render_structured, render_text, StructuredFinding, StructuredReport};

use crate::config::EvaluationMode;
use crate::finding::{Finding, Severity};
use crate::validators::ValidatorMode;
use serde::{Deserialize, Serialize};

// ============================================================================
// Verdict
// ============================================================================

/// Whether the change may merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// Process exit status for this verdict.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
        }
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

// ============================================================================
// Severity counts
// ============================================================================

/// Number of findings per severity, suppressed findings included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    #[must_use]
    pub fn tally<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            counts.add(finding.severity());
        }
        counts
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    #[must_use]
    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

// ============================================================================
// Entries
// ============================================================================

/// A finding plus where it came from and how it counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub finding: Finding,
    /// Name of the validator that produced the finding.
    pub validator: String,
    pub mode: ValidatorMode,
    /// Matched by a current override; still reported, never blocks.
    pub suppressed: bool,
}

impl ReportEntry {
    /// Reported for information only.
    #[must_use]
    pub fn is_advisory(&self) -> bool {
        self.mode != ValidatorMode::Error
    }

    /// Eligible to influence the verdict.
    #[must_use]
    pub fn counts_toward_verdict(&self) -> bool {
        !self.suppressed && self.mode == ValidatorMode::Error
    }
}

/// Why a validator's findings are missing from a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    TimedOut,
    Cancelled,
    Failed,
}

/// A validator that did not finish normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteValidator {
    pub validator: String,
    pub reason: Interruption,
}

// ============================================================================
// QualityReport
// ============================================================================

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub mode: EvaluationMode,
    pub entries: Vec<ReportEntry>,
    pub severity_counts: SeverityCounts,
    pub verdict: Verdict,
    /// Distinct rule ids of suppressed entries, sorted.
    pub suppressed_rule_ids: Vec<String>,
    pub incomplete: Vec<IncompleteValidator>,
}

impl QualityReport {
    /// Every finding in report order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.entries.iter().map(|e| &e.finding)
    }

    /// Entries of one severity, in report order.
    pub fn entries_at(&self, severity: Severity) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(move |e| e.finding.severity() == severity)
    }

    /// Entries that could have changed the verdict.
    pub fn blocking_candidates(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.counts_toward_verdict())
    }

    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Whether evaluation was cancelled before every validator finished.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.incomplete
            .iter()
            .any(|i| i.reason == Interruption::Cancelled)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Category;

    fn finding(severity: Severity) -> Finding {
        Finding::new(Category::Security, severity, "rule", "message")
    }

    #[test]
    fn test_verdict_exit_codes() {
        assert_eq!(Verdict::Pass.exit_code(), 0);
        assert_eq!(Verdict::Fail.exit_code(), 1);
        assert_eq!(Verdict::Fail.to_string(), "fail");
    }

    #[test]
    fn test_severity_counts_tally() {
        let findings = vec![
            finding(Severity::High),
            finding(Severity::High),
            finding(Severity::Low),
        ];
        let counts = SeverityCounts::tally(&findings);
        assert_eq!(counts.get(Severity::High), 2);
        assert_eq!(counts.get(Severity::Critical), 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_severity_counts_serialize_by_name() {
        let json = serde_json::to_value(SeverityCounts {
            critical: 1,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["critical"], 1);
        assert_eq!(json["low"], 0);
    }

    #[test]
    fn test_entry_verdict_eligibility() {
        let mut entry = ReportEntry {
            finding: finding(Severity::Critical),
            validator: "security".into(),
            mode: ValidatorMode::Error,
            suppressed: false,
        };
        assert!(entry.counts_toward_verdict());

        entry.suppressed = true;
        assert!(!entry.counts_toward_verdict());

        entry.suppressed = false;
        entry.mode = ValidatorMode::Warning;
        assert!(entry.is_advisory());
        assert!(!entry.counts_toward_verdict());
    }
}
