//! Finding value types.
//!
//! A [`Finding`] describes one issue detected by a validator. Findings are
//! immutable once built: the builder methods consume the value, and there are
//! no setters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable identifiers for findings synthesised by the engine itself rather
/// than by a validator rule.
pub mod rule_ids {
    /// A validator could not analyse a file.
    pub const PARSE_ERROR: &str = "parse-error";
    /// A validator exceeded its time budget.
    pub const TIMEOUT: &str = "timeout";
    /// Evaluation was cancelled before the validator finished.
    pub const CANCELLED: &str = "cancelled";
    /// A validator crashed.
    pub const VALIDATOR_FAILURE: &str = "validator-failure";
}

// ============================================================================
// Severity
// ============================================================================

/// Severity level for findings, totally ordered `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, never blocks on its own.
    Low,
    /// Should be fixed.
    Medium,
    /// Counted against the high-severity threshold.
    High,
    /// Blocks by default.
    Critical,
}

impl Severity {
    /// All severities, most severe first.
    pub const DESCENDING: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Lowercase name used in structured output and configuration.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "Invalid severity '{}'. Valid options: critical, high, medium, low",
                other
            )),
        }
    }
}

// ============================================================================
// Category
// ============================================================================

/// Concern a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Architecture,
    TestCoverage,
    Performance,
    BreakingChange,
}

impl Category {
    /// Snake-case name used in structured output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Architecture => "architecture",
            Self::TestCoverage => "test_coverage",
            Self::Performance => "performance",
            Self::BreakingChange => "breaking_change",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Finding
// ============================================================================

/// A single issue detected in a change set.
///
/// Two findings are equal iff every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    file_path: String,
    line_number: Option<u32>,
    category: Category,
    severity: Severity,
    message: String,
    suggested_fix: Option<String>,
    rule_id: String,
}

impl Finding {
    /// Create a PR-level finding (no file, no line).
    pub fn new(
        category: Category,
        severity: Severity,
        rule_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let rule_id = rule_id.into();
        let mut message = message.into();
        if message.trim().is_empty() {
            message = format!("{} detected", rule_id);
        }
        Self {
            file_path: String::new(),
            line_number: None,
            category,
            severity,
            message,
            suggested_fix: None,
            rule_id,
        }
    }

    /// Attach the file the finding refers to.
    #[must_use]
    pub fn in_file(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = file_path.into();
        self
    }

    /// Attach a file and a 1-based line number. Line `0` means "no line".
    #[must_use]
    pub fn with_location(mut self, file_path: impl Into<String>, line: u32) -> Self {
        self.file_path = file_path.into();
        self.line_number = (line > 0).then_some(line);
        self
    }

    /// Add a suggested fix. Example code is kept as plain text.
    #[must_use]
    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        let fix = fix.into();
        self.suggested_fix = (!fix.is_empty()).then_some(fix);
        self
    }

    // =========================================================================
    // Synthetic findings
    // =========================================================================

    /// A file the validator could not analyse.
    pub fn parse_error(category: Category, file_path: &str, reason: &str) -> Self {
        Self::new(
            category,
            Severity::Low,
            rule_ids::PARSE_ERROR,
            format!("Could not analyse file: {}", reason),
        )
        .in_file(file_path)
    }

    /// A validator that exceeded its time budget.
    pub fn timeout(category: Category, validator: &str, budget: Duration) -> Self {
        Self::new(
            category,
            Severity::Low,
            rule_ids::TIMEOUT,
            format!(
                "Validator '{}' timed out after {}ms; its findings are missing from this report",
                validator,
                budget.as_millis()
            ),
        )
    }

    /// A validator abandoned because evaluation was cancelled.
    pub fn cancelled(category: Category, validator: &str) -> Self {
        Self::new(
            category,
            Severity::Low,
            rule_ids::CANCELLED,
            format!(
                "Validator '{}' did not finish before evaluation was cancelled",
                validator
            ),
        )
    }

    /// A validator that crashed.
    pub fn validator_failure(category: Category, validator: &str, detail: &str) -> Self {
        Self::new(
            category,
            Severity::Low,
            rule_ids::VALIDATOR_FAILURE,
            format!("Validator '{}' failed: {}", validator, detail),
        )
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Repository-relative path; empty for PR-level findings.
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    #[must_use]
    pub fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn suggested_fix(&self) -> Option<&str> {
        self.suggested_fix.as_deref()
    }

    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Whether the finding was synthesised by the engine (parse error,
    /// timeout, cancellation, crash) rather than by a validator rule.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self.rule_id.as_str(),
            rule_ids::PARSE_ERROR
                | rule_ids::TIMEOUT
                | rule_ids::CANCELLED
                | rule_ids::VALIDATOR_FAILURE
        )
    }

    /// `path:line`, `path`, or `(pull request)` for PR-level findings.
    #[must_use]
    pub fn location(&self) -> String {
        match (self.file_path.is_empty(), self.line_number) {
            (true, _) => "(pull request)".to_string(),
            (false, Some(line)) => format!("{}:{}", self.file_path, line),
            (false, None) => self.file_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::DESCENDING[0], Severity::Critical);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::BreakingChange).unwrap();
        assert_eq!(json, "\"breaking_change\"");
        assert_eq!(Category::TestCoverage.as_str(), "test_coverage");
    }

    #[test]
    fn test_finding_builder() {
        let finding = Finding::new(
            Category::Security,
            Severity::Critical,
            "hardcoded-credential",
            "Hardcoded API key",
        )
        .with_location("src/config.py", 3)
        .with_suggested_fix("Read it from the environment");

        assert_eq!(finding.file_path(), "src/config.py");
        assert_eq!(finding.line_number(), Some(3));
        assert_eq!(finding.location(), "src/config.py:3");
        assert_eq!(finding.suggested_fix(), Some("Read it from the environment"));
        assert!(!finding.is_synthetic());
    }

    #[test]
    fn test_line_zero_means_no_line() {
        let finding = Finding::new(Category::Performance, Severity::Medium, "r", "m")
            .with_location("a.py", 0);
        assert_eq!(finding.line_number(), None);
        assert_eq!(finding.location(), "a.py");
    }

    #[test]
    fn test_pr_level_location() {
        let finding = Finding::new(Category::TestCoverage, Severity::High, "r", "m");
        assert_eq!(finding.location(), "(pull request)");
    }

    #[test]
    fn test_empty_message_is_replaced() {
        let finding = Finding::new(Category::Security, Severity::Low, "some-rule", "  ");
        assert!(!finding.message().trim().is_empty());
    }

    #[test]
    fn test_equality_is_fieldwise() {
        let a = Finding::new(Category::Security, Severity::High, "r", "m").with_location("x", 1);
        let b = Finding::new(Category::Security, Severity::High, "r", "m").with_location("x", 1);
        let c = Finding::new(Category::Security, Severity::High, "r", "m").with_location("x", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_synthetic_findings() {
        let timeout = Finding::timeout(
            Category::Performance,
            "performance",
            Duration::from_millis(1500),
        );
        assert_eq!(timeout.severity(), Severity::Low);
        assert_eq!(timeout.rule_id(), rule_ids::TIMEOUT);
        assert!(timeout.message().contains("1500ms"));
        assert!(timeout.is_synthetic());

        let parse = Finding::parse_error(Category::Security, "blob.bin", "binary content");
        assert_eq!(parse.file_path(), "blob.bin");
        assert!(parse.is_synthetic());
    }
}
