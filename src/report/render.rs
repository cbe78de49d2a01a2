//! Text and structured rendering of a [`QualityReport`].
//!
//! Both renderings are pure functions of the report: the same report always
//! produces byte-identical output.

use super::{Interruption, QualityReport, ReportEntry, SeverityCounts, Verdict};
use crate::finding::{Category, Finding, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Command shown to users who want to record an override.
const OVERRIDE_HINT: &str = "mergegate override add --rule <rule-id> [--file <path>] --author <name> --justification \"<at least 50 characters>\"";

// ============================================================================
// Text
// ============================================================================

/// Render a human-readable report grouped by severity, most severe first.
#[must_use]
pub fn render_text(report: &QualityReport) -> String {
    let mut output = String::new();
    let counts = &report.severity_counts;

    output.push_str(&format!(
        "Quality gate: {} (mode: {})\n",
        report.verdict.to_string().to_uppercase(),
        report.mode
    ));
    output.push_str(&format!(
        "Findings: {} (critical {}, high {}, medium {}, low {})\n",
        counts.total(),
        counts.critical,
        counts.high,
        counts.medium,
        counts.low
    ));

    if report.is_empty() {
        output.push_str("\nNo findings.\n");
    }

    for severity in Severity::DESCENDING {
        let entries: Vec<&ReportEntry> = report.entries_at(severity).collect();
        if entries.is_empty() {
            continue;
        }
        output.push_str(&format!("\n## {} ({})\n", severity, entries.len()));
        for entry in entries {
            output.push_str(&render_entry(entry));
        }
    }

    if !report.suppressed_rule_ids.is_empty() {
        output.push_str("\n## Suppressed by override\n");
        for rule_id in &report.suppressed_rule_ids {
            output.push_str(&format!("  - {}\n", rule_id));
        }
    }

    if !report.incomplete.is_empty() {
        output.push_str("\n## Incomplete validators\n");
        for incomplete in &report.incomplete {
            let reason = match incomplete.reason {
                Interruption::TimedOut => "timed out",
                Interruption::Cancelled => "cancelled",
                Interruption::Failed => "failed",
            };
            output.push_str(&format!("  - {}: {}\n", incomplete.validator, reason));
        }
    }

    output.push_str("\n## Next steps\n");
    match report.verdict {
        Verdict::Pass if report.blocking_candidates().next().is_none() => {
            output.push_str("  No blocking findings. Safe to merge.\n");
        }
        Verdict::Pass => {
            output.push_str("  Findings are below the blocking thresholds. Consider fixing them before merging.\n");
        }
        Verdict::Fail => {
            output.push_str("  Fix the findings above, or record a justified override:\n");
            output.push_str(&format!("    {}\n", OVERRIDE_HINT));
        }
    }

    output
}

fn render_entry(entry: &ReportEntry) -> String {
    let finding = &entry.finding;
    let mut line = format!(
        "  [{}] {} - {}",
        finding.rule_id(),
        finding.location(),
        finding.message()
    );
    if entry.suppressed {
        line.push_str(" [suppressed]");
    }
    if entry.is_advisory() {
        line.push_str(&format!(" [advisory: {}]", entry.validator));
    }
    line.push('\n');

    if let Some(fix) = finding.suggested_fix() {
        for (i, fix_line) in fix.lines().enumerate() {
            let prefix = if i == 0 { "fix: " } else { "     " };
            line.push_str(&format!("      {}{}\n", prefix, fix_line));
        }
    }
    line
}

// ============================================================================
// Structured
// ============================================================================

/// One finding in the structured schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredFinding {
    pub file_path: String,
    pub line: Option<u32>,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    pub suggested_fix: Option<String>,
    pub rule_id: String,
}

impl From<&Finding> for StructuredFinding {
    fn from(finding: &Finding) -> Self {
        Self {
            file_path: finding.file_path().to_string(),
            line: finding.line_number(),
            category: finding.category(),
            severity: finding.severity(),
            message: finding.message().to_string(),
            suggested_fix: finding.suggested_fix().map(str::to_string),
            rule_id: finding.rule_id().to_string(),
        }
    }
}

/// The structured schema, for consumers that read reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredReport {
    pub findings: Vec<StructuredFinding>,
    pub severity_counts: SeverityCounts,
    pub verdict: Verdict,
    pub suppressed_rule_ids: Vec<String>,
}

impl From<&QualityReport> for StructuredReport {
    fn from(report: &QualityReport) -> Self {
        Self {
            findings: report.findings().map(StructuredFinding::from).collect(),
            severity_counts: report.severity_counts,
            verdict: report.verdict,
            suppressed_rule_ids: report.suppressed_rule_ids.clone(),
        }
    }
}

fn finding_value(finding: &Finding) -> Value {
    json!({
        "file_path": finding.file_path(),
        "line": finding.line_number(),
        "category": finding.category().as_str(),
        "severity": finding.severity().as_str(),
        "message": finding.message(),
        "suggested_fix": finding.suggested_fix(),
        "rule_id": finding.rule_id(),
    })
}

/// Render the structured schema as a JSON value.
#[must_use]
pub fn render_structured(report: &QualityReport) -> Value {
    let counts = &report.severity_counts;
    json!({
        "findings": report.findings().map(finding_value).collect::<Vec<_>>(),
        "severity_counts": {
            "critical": counts.critical,
            "high": counts.high,
            "medium": counts.medium,
            "low": counts.low,
        },
        "verdict": report.verdict.to_string(),
        "suppressed_rule_ids": report.suppressed_rule_ids,
    })
}

/// Pretty-printed [`render_structured`].
#[must_use]
pub fn render_json(report: &QualityReport) -> String {
    format!("{:#}", render_structured(report))
}
