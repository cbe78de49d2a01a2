//! Controllable validator test doubles.

use crate::changes::ChangeSet;
use crate::finding::Finding;
use crate::validators::{Validator, ValidatorKind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A validator that returns canned findings.
///
/// # Example
///
/// ```rust,ignore
/// let validator = MockValidator::new("slow")
///     .with_findings(vec![finding])
///     .with_delay(Duration::from_millis(50));
///
/// assert_eq!(validator.inspect(&changes), vec![finding]);
/// assert_eq!(validator.call_count(), 1);
/// ```
#[derive(Debug)]
pub struct MockValidator {
    name: String,
    kind: ValidatorKind,
    findings: Vec<Finding>,
    delay: Option<Duration>,
    panic_message: Option<String>,
    calls: AtomicU32,
}

impl MockValidator {
    /// A validator named `name` that finds nothing.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ValidatorKind::Security,
            findings: Vec::new(),
            delay: None,
            panic_message: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Report as a different validator family.
    #[must_use]
    pub fn with_kind(mut self, kind: ValidatorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Findings to return from every inspection.
    #[must_use]
    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    /// Block the inspecting thread for `delay` first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic with `message` instead of returning.
    #[must_use]
    pub fn panicking(mut self, message: &str) -> Self {
        self.panic_message = Some(message.to_string());
        self
    }

    /// Number of inspections started.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Validator for MockValidator {
    fn kind(&self) -> ValidatorKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn inspect(&self, _changes: &ChangeSet) -> Vec<Finding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.panic_message {
            panic!("{}", message);
        }
        self.findings.clone()
    }
}
