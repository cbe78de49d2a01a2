//! Test coverage validator.
//!
//! New public functions need a test file, found by naming convention, that
//! calls them. Bug-fix pull requests need a test change, and changed test
//! files need assertions.

use super::{build_globset, parse_source, source::compile, SourceFile, SourceLanguage, Validator, ValidatorKind};
use crate::changes::ChangeSet;
use crate::error::Result;
use crate::finding::{Category, Finding, Severity};
use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const UNTESTED_FUNCTION: &str = "untested-function";
pub const MISSING_REGRESSION_TEST: &str = "missing-regression-test";
pub const TEST_WITHOUT_ASSERTIONS: &str = "test-without-assertions";

/// Parameters accepted under `validators.test_coverage.parameters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestCoverageSettings {
    /// Paths where an untested function is `high` rather than `medium`.
    pub critical_paths: Vec<String>,
    pub exclude: Vec<String>,
    pub require_regression_tests: bool,
    pub check_assertions: bool,
}

impl Default for TestCoverageSettings {
    fn default() -> Self {
        Self {
            critical_paths: vec![
                "**/auth/**".to_string(),
                "**/security/**".to_string(),
                "**/payments/**".to_string(),
                "**/billing/**".to_string(),
            ],
            exclude: Vec::new(),
            require_regression_tests: true,
            check_assertions: true,
        }
    }
}

pub struct TestCoverageValidator {
    critical_paths: GlobSet,
    exclude: GlobSet,
    require_regression_tests: bool,
    check_assertions: bool,
    bug_fix: Regex,
    assertions: Vec<Regex>,
    test_definitions: Vec<Regex>,
}

impl TestCoverageValidator {
    /// # Errors
    ///
    /// Returns a configuration error for invalid globs.
    pub fn new(settings: TestCoverageSettings) -> Result<Self> {
        let field = "validators.test_coverage.parameters";
        Ok(Self {
            critical_paths: build_globset(&format!("{}.critical_paths", field), &settings.critical_paths)?,
            exclude: build_globset(&format!("{}.exclude", field), &settings.exclude)?,
            require_regression_tests: settings.require_regression_tests,
            check_assertions: settings.check_assertions,
            bug_fix: Regex::new(r"(?i)\b(?:fix(?:e[sd])?|bug(?:fix)?|regression|hotfix)\b")
                .map_err(|e| crate::error::GateError::Other(e.into()))?,
            assertions: compile(&[
                r"\bassert",
                r"\bexpect\s*\(",
                r"\.should\b",
                r"\bt\.(?:Error|Errorf|Fatal|Fatalf|Fail|FailNow)\b",
                r"\brequire\.\w+\s*\(",
                r"\bAssert\.\w+",
                r"\bpytest\.raises\b",
                r"#\[should_panic",
                r"\bverify\s*\(",
            ]),
            test_definitions: compile(&[
                r"^\s*(?:async\s+)?def\s+test\w*\s*\(",
                r"^\s*(?:it|test)\s*\(",
                r"#\[(?:tokio::)?test\]",
                r"^func\s+Test\w*\s*\(",
                r"@Test\b",
            ]),
        })
    }

    /// Changed and previous test files, preferring changed content.
    fn test_files<'c>(&self, changes: &'c ChangeSet) -> Vec<(&'c str, &'c str)> {
        let mut seen = BTreeSet::new();
        changes
            .changed_files()
            .iter()
            .chain(changes.previous_files())
            .filter(|(path, _)| is_test_file(path) && seen.insert(path.as_str()))
            .map(|(path, content)| (path.as_str(), content.as_str()))
            .collect()
    }

    fn check_untested(
        &self,
        file: &SourceFile<'_>,
        changes: &ChangeSet,
        tests: &[(&str, &str)],
        findings: &mut Vec<Finding>,
    ) {
        let previous: BTreeSet<String> = changes
            .previous_of(file.path())
            .and_then(|content| SourceFile::parse(file.path(), content).ok())
            .map(|prev| prev.public_callables().map(|d| d.qualified.clone()).collect())
            .unwrap_or_default();

        let stem = source_stem(file.path());
        let candidates: Vec<&str> = tests
            .iter()
            .filter(|(path, _)| test_subject(path).as_deref() == Some(stem))
            .map(|(_, content)| *content)
            .collect();
        let inline_tests = match file.language() {
            Some(SourceLanguage::Rust) => file
                .lines()
                .iter()
                .position(|l| l.trim_start().starts_with("#[cfg(test)]")),
            _ => None,
        };

        for def in file.public_callables() {
            if previous.contains(&def.qualified) {
                continue;
            }
            let Ok(call) = Regex::new(&format!(r"\b{}\s*\(", regex::escape(&def.name))) else {
                continue;
            };
            let tested_inline = inline_tests.is_some_and(|start| {
                file.lines().iter().skip(start + 1).any(|l| call.is_match(l))
            });
            if tested_inline || candidates.iter().any(|content| call.is_match(content)) {
                continue;
            }

            let severity = if self.critical_paths.is_match(file.path()) {
                Severity::High
            } else {
                Severity::Medium
            };
            findings.push(
                Finding::new(
                    Category::TestCoverage,
                    severity,
                    UNTESTED_FUNCTION,
                    format!("New public function '{}' has no test", def.qualified),
                )
                .with_location(file.path(), def.line)
                .with_suggested_fix(format!(
                    "Add a test in {} that calls {}()",
                    suggested_test_file(file.path(), file.language()),
                    def.name
                )),
            );
        }
    }

    fn check_test_assertions(&self, path: &str, content: &str, findings: &mut Vec<Finding>) {
        let lines: Vec<&str> = content.lines().collect();
        let Some(first_test) = lines
            .iter()
            .position(|l| self.test_definitions.iter().any(|re| re.is_match(l)))
        else {
            return;
        };
        if lines
            .iter()
            .any(|l| self.assertions.iter().any(|re| re.is_match(l)))
        {
            return;
        }
        findings.push(
            Finding::new(
                Category::TestCoverage,
                Severity::Medium,
                TEST_WITHOUT_ASSERTIONS,
                "Test file defines tests but makes no assertions",
            )
            .with_location(path, u32::try_from(first_test + 1).unwrap_or(u32::MAX))
            .with_suggested_fix("Assert on the behaviour under test"),
        );
    }
}

impl Validator for TestCoverageValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::TestCoverage
    }

    fn inspect(&self, changes: &ChangeSet) -> Vec<Finding> {
        let mut findings = Vec::new();
        let tests = self.test_files(changes);
        let mut source_changed = false;
        let mut test_changed = false;

        for (path, content) in changes.changed_files() {
            if self.exclude.is_match(path) || SourceLanguage::from_path(path).is_none() {
                continue;
            }
            if is_test_file(path) {
                test_changed = true;
                if self.check_assertions {
                    self.check_test_assertions(path, content, &mut findings);
                }
                continue;
            }
            source_changed = true;
            match parse_source(Category::TestCoverage, path, content) {
                Ok(file) => self.check_untested(&file, changes, &tests, &mut findings),
                Err(finding) => findings.push(finding),
            }
        }

        let claims_fix = self.bug_fix.is_match(changes.pr_title())
            || self.bug_fix.is_match(changes.pr_description());
        if self.require_regression_tests && claims_fix && source_changed && !test_changed {
            findings.push(
                Finding::new(
                    Category::TestCoverage,
                    Severity::High,
                    MISSING_REGRESSION_TEST,
                    "Bug fix without a regression test",
                )
                .with_suggested_fix("Add a test that fails without this fix"),
            );
        }

        findings
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// File name without its extension.
fn source_stem(path: &str) -> &str {
    strip_extension(file_name(path))
}

/// Whether `path` looks like a test file under common conventions.
#[must_use]
pub fn is_test_file(path: &str) -> bool {
    let in_test_dir = path
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| matches!(dir, "tests" | "test" | "__tests__"));
    in_test_dir || test_subject(path).is_some_and(|subject| subject != source_stem(path))
}

/// Stem of the file a test file covers: `test_math.py` covers `math`.
fn test_subject(path: &str) -> Option<String> {
    let name = file_name(path);
    let stem = strip_extension(name);
    let java = name.ends_with(".java");

    if let Some(s) = stem.strip_suffix(".test").or_else(|| stem.strip_suffix(".spec")) {
        return Some(s.to_string());
    }
    if let Some(s) = stem.strip_prefix("test_") {
        return Some(s.to_string());
    }
    if let Some(s) = stem.strip_suffix("_test") {
        return Some(s.to_string());
    }
    if java {
        if let Some(s) = stem.strip_suffix("Tests").or_else(|| stem.strip_suffix("Test")) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    let in_test_dir = path
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| matches!(dir, "tests" | "test" | "__tests__"));
    in_test_dir.then(|| stem.to_string())
}

fn suggested_test_file(path: &str, language: Option<SourceLanguage>) -> String {
    let stem = source_stem(path);
    match language {
        Some(SourceLanguage::Python) => format!("test_{}.py", stem),
        Some(SourceLanguage::Go) => format!("{}_test.go", stem),
        Some(SourceLanguage::TypeScript) => format!("{}.test.ts", stem),
        Some(SourceLanguage::JavaScript) => format!("{}.test.js", stem),
        Some(SourceLanguage::Rust) => format!("tests/{}.rs or a #[cfg(test)] module", stem),
        Some(SourceLanguage::Java) => format!("{}Test.java", stem),
        None => format!("a test file for {}", stem),
    }
}
