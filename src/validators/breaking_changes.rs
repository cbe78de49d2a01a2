//! Breaking change validator.
//!
//! Compares the public surface of every modified file before and after the
//! change. A break is exempt when a changelog file in the change adds a line
//! naming the affected symbol.

use super::{
    build_globset, build_globset_ci, parse_source, source::{Definition, Param}, SourceFile,
    SourceLanguage, Validator, ValidatorKind,
};
use crate::changes::ChangeSet;
use crate::error::{GateError, Result};
use crate::finding::{Category, Finding, Severity};
use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const REMOVED_PUBLIC_SYMBOL: &str = "removed-public-symbol";
pub const INCOMPATIBLE_SIGNATURE: &str = "incompatible-signature";
pub const RETURN_TYPE_CHANGED: &str = "return-type-changed";
pub const REMOVED_PUBLIC_MODULE: &str = "removed-public-module";
pub const DESTRUCTIVE_MIGRATION: &str = "destructive-migration";
pub const CHANGELOG_FORMAT: &str = "changelog-format";

/// Parameters accepted under `validators.breaking_changes.parameters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakingChangesSettings {
    /// Case-insensitive glob identifying changelog files.
    pub changelog_glob: String,
    pub check_return_types: bool,
    pub migration_paths: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for BreakingChangesSettings {
    fn default() -> Self {
        Self {
            changelog_glob: "**/CHANGELOG*".to_string(),
            check_return_types: true,
            migration_paths: vec![
                "**/migrations/**".to_string(),
                "**/migrate/**".to_string(),
                "**/*.sql".to_string(),
            ],
            exclude: Vec::new(),
        }
    }
}

pub struct BreakingChangesValidator {
    changelog: GlobSet,
    check_return_types: bool,
    migrations: GlobSet,
    exclude: GlobSet,
    destructive: Regex,
    release_heading: Regex,
}

/// Lines added to changelog files by this change.
struct ChangelogAdditions<'c> {
    files: Vec<&'c str>,
    lines: Vec<&'c str>,
}

impl ChangelogAdditions<'_> {
    fn mentions(&self, name: &str) -> bool {
        let Ok(word) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
            return false;
        };
        self.lines.iter().any(|line| word.is_match(line))
    }
}

impl BreakingChangesValidator {
    /// # Errors
    ///
    /// Returns a configuration error for invalid globs.
    pub fn new(settings: BreakingChangesSettings) -> Result<Self> {
        let field = "validators.breaking_changes.parameters";
        let regex = |pattern: &str| Regex::new(pattern).map_err(|e| GateError::Other(e.into()));
        Ok(Self {
            changelog: build_globset_ci(
                &format!("{}.changelog_glob", field),
                std::slice::from_ref(&settings.changelog_glob),
            )?,
            check_return_types: settings.check_return_types,
            migrations: build_globset(&format!("{}.migration_paths", field), &settings.migration_paths)?,
            exclude: build_globset(&format!("{}.exclude", field), &settings.exclude)?,
            destructive: regex(
                r"(?i)\bdrop\s+(?:table|column)\b|\bdrop_(?:table|column)\b|\bremove_column\b|\b(?:dropTable|dropColumn|removeColumn|RemoveField|DeleteModel)\b|\balter\s+table\s+\S+\s+drop\b|\btruncate\s+(?:table\s+)?\w",
            )?,
            release_heading: regex(r"(?m)^##\s*\[(?:Unreleased|\d+\.\d+\.\d+[^\]]*)\]")?,
        })
    }

    fn changelog_additions<'c>(&self, changes: &'c ChangeSet) -> ChangelogAdditions<'c> {
        let files: Vec<&str> = changes
            .changed_files()
            .keys()
            .map(String::as_str)
            .filter(|p| self.changelog.is_match(p))
            .collect();
        let lines = files
            .iter()
            .flat_map(|p| changes.added_lines(p))
            .map(|(_, line)| line)
            .collect();
        ChangelogAdditions { files, lines }
    }

    /// Compare one modified file. Returns whether any break was detected,
    /// exempt or not.
    fn compare(
        &self,
        old: &SourceFile<'_>,
        new: &SourceFile<'_>,
        changelog: &ChangelogAdditions<'_>,
        findings: &mut Vec<Finding>,
    ) -> bool {
        let mut new_public: BTreeMap<&str, &Definition> = BTreeMap::new();
        for def in new.public_symbols() {
            new_public.entry(def.qualified.as_str()).or_insert(def);
        }
        let mut seen = std::collections::BTreeSet::new();
        let mut detected = false;
        let language = new.language();

        for old_def in old.public_symbols() {
            if !seen.insert(old_def.qualified.as_str()) {
                continue;
            }
            let (rule, message, line) = match new_public.get(old_def.qualified.as_str()) {
                None => (
                    REMOVED_PUBLIC_SYMBOL,
                    format!("Public {} '{}' was removed", kind_label(old_def), old_def.qualified),
                    0,
                ),
                Some(new_def) if old_def.is_callable() && new_def.is_callable() => {
                    if let Some(reason) = incompatibility(language, &old_def.params, &new_def.params) {
                        (
                            INCOMPATIBLE_SIGNATURE,
                            format!(
                                "Incompatible signature for '{}': {} (was {}, now {})",
                                old_def.qualified,
                                reason,
                                old_def.signature(),
                                new_def.signature()
                            ),
                            new_def.line,
                        )
                    } else if let Some((before, after)) = self.return_change(old_def, new_def) {
                        (
                            RETURN_TYPE_CHANGED,
                            format!(
                                "Return type of '{}' changed from {} to {}",
                                old_def.qualified, before, after
                            ),
                            new_def.line,
                        )
                    } else {
                        continue;
                    }
                }
                Some(_) => continue,
            };

            detected = true;
            if changelog.mentions(&old_def.name) {
                tracing::debug!(symbol = %old_def.qualified, rule, "Breaking change noted in changelog");
                continue;
            }
            findings.push(
                Finding::new(Category::BreakingChange, Severity::High, rule, message)
                    .with_location(new.path(), line)
                    .with_suggested_fix(format!(
                        "Keep the old form working, or add a changelog entry: - **BREAKING CHANGE**: `{}`",
                        old_def.name
                    )),
            );
        }
        detected
    }

    fn return_change(&self, old: &Definition, new: &Definition) -> Option<(String, String)> {
        if !self.check_return_types {
            return None;
        }
        match (&old.return_type, &new.return_type) {
            (Some(before), Some(after)) if compact(before) != compact(after) => {
                Some((before.clone(), after.clone()))
            }
            _ => None,
        }
    }

    fn check_deleted_module(
        &self,
        path: &str,
        content: &str,
        changelog: &ChangelogAdditions<'_>,
        findings: &mut Vec<Finding>,
    ) -> bool {
        let Ok(old) = SourceFile::parse(path, content) else {
            return false;
        };
        let public = old.public_symbols().count();
        if public == 0 {
            return false;
        }
        let stem = path
            .rsplit('/')
            .next()
            .and_then(|name| name.split('.').next())
            .unwrap_or(path);
        if changelog.mentions(path) || changelog.mentions(stem) {
            return true;
        }
        findings.push(
            Finding::new(
                Category::BreakingChange,
                Severity::High,
                REMOVED_PUBLIC_MODULE,
                format!("Deleted module exposed {} public symbol(s)", public),
            )
            .in_file(path)
            .with_suggested_fix(format!(
                "Keep a deprecated re-export, or add a changelog entry: - **BREAKING CHANGE**: Removed {}",
                path
            )),
        );
        true
    }

    fn check_migration(&self, path: &str, changes: &ChangeSet, findings: &mut Vec<Finding>) {
        for (line_no, line) in changes.added_lines(path) {
            if !self.destructive.is_match(line) {
                continue;
            }
            findings.push(
                Finding::new(
                    Category::BreakingChange,
                    Severity::High,
                    DESTRUCTIVE_MIGRATION,
                    format!("Destructive schema change: {}", line.trim()),
                )
                .with_location(path, u32::try_from(line_no).unwrap_or(u32::MAX))
                .with_suggested_fix(
                    "Deprecate first and drop in a later release, after readers stop using the column or table",
                ),
            );
        }
    }
}

impl Validator for BreakingChangesValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::BreakingChanges
    }

    fn inspect(&self, changes: &ChangeSet) -> Vec<Finding> {
        let mut findings = Vec::new();
        let changelog = self.changelog_additions(changes);
        let mut detected = false;

        for path in changes.modifications() {
            if self.exclude.is_match(path) || SourceLanguage::from_path(path).is_none() {
                continue;
            }
            let (Some(old_content), Some(new_content)) =
                (changes.previous_of(path), changes.content_of(path))
            else {
                continue;
            };
            let parsed = parse_source(Category::BreakingChange, path, old_content)
                .and_then(|old| parse_source(Category::BreakingChange, path, new_content).map(|new| (old, new)));
            match parsed {
                Ok((old, new)) => detected |= self.compare(&old, &new, &changelog, &mut findings),
                Err(finding) => findings.push(finding),
            }
        }

        for path in changes.deletions() {
            if self.exclude.is_match(path) || SourceLanguage::from_path(path).is_none() {
                continue;
            }
            if let Some(content) = changes.previous_of(path) {
                detected |= self.check_deleted_module(path, content, &changelog, &mut findings);
            }
        }

        for path in changes.changed_files().keys() {
            if self.migrations.is_match(path) && !self.exclude.is_match(path) {
                self.check_migration(path, changes, &mut findings);
            }
        }

        if detected {
            for path in &changelog.files {
                let content = changes.content_of(path).unwrap_or("");
                if !self.release_heading.is_match(content) {
                    findings.push(
                        Finding::new(
                            Category::BreakingChange,
                            Severity::Medium,
                            CHANGELOG_FORMAT,
                            "Changelog has no '## [Unreleased]' or '## [x.y.z]' section",
                        )
                        .in_file(*path)
                        .with_suggested_fix(
                            "Add a '## [Unreleased]' section with a '### BREAKING CHANGES' subsection",
                        ),
                    );
                }
            }
        }

        findings
    }
}

fn kind_label(def: &Definition) -> &'static str {
    if def.is_callable() {
        "function"
    } else {
        "type"
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Why `new` cannot replace `old` for existing callers, if it cannot.
///
/// Python callers may pass arguments by keyword, so parameters are matched by
/// name there. Elsewhere arguments are positional and only arity, order and
/// optionality matter.
fn incompatibility(language: Option<SourceLanguage>, old: &[Param], new: &[Param]) -> Option<String> {
    let by_name = matches!(language, Some(SourceLanguage::Python));
    let find = |params: &[Param], name: &str| params.iter().position(|p| p.name == name);

    if by_name {
        if let Some(gone) = old.iter().find(|p| find(new, &p.name).is_none()) {
            return Some(format!("parameter '{}' removed", gone.name));
        }
    } else if new.len() < old.len() {
        let gone = &old[new.len()];
        return Some(format!("parameter '{}' removed", gone.name));
    }

    let added_required = if by_name {
        new.iter().find(|p| !p.optional && find(old, &p.name).is_none())
    } else {
        new.iter().skip(old.len()).find(|p| !p.optional)
    };
    if let Some(added) = added_required {
        return Some(format!("required parameter '{}' added", added.name));
    }

    let common_old: Vec<&str> = old
        .iter()
        .filter(|p| find(new, &p.name).is_some())
        .map(|p| p.name.as_str())
        .collect();
    let common_new: Vec<&str> = new
        .iter()
        .filter(|p| find(old, &p.name).is_some())
        .map(|p| p.name.as_str())
        .collect();
    if common_old.len() > 1 && common_old != common_new {
        return Some("parameters reordered".to_string());
    }

    for (index, before) in old.iter().enumerate() {
        let after = if by_name {
            find(new, &before.name).map(|i| &new[i])
        } else {
            new.get(index)
        };
        if let Some(after) = after {
            if before.optional && !after.optional {
                return Some(format!("parameter '{}' is no longer optional", after.name));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> BreakingChangesValidator {
        BreakingChangesValidator::new(BreakingChangesSettings::default()).unwrap()
    }

    fn modified(path: &str, old: &str, new: &str) -> ChangeSet {
        ChangeSet::new("t", "")
            .with_previous(path, old)
            .with_changed(path, new)
    }

    fn rules(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(Finding::rule_id).collect()
    }

    const OLD_USERS: &str = "export function getUser(id) {\n  return db.find(id);\n}\n";
    const NEW_USERS: &str = "export function getUser(id, email) {\n  return db.find(id, email);\n}\n";

    #[test]
    fn test_required_parameter_added() {
        let findings = validator().inspect(&modified("api/users.js", OLD_USERS, NEW_USERS));
        assert_eq!(rules(&findings), vec![INCOMPATIBLE_SIGNATURE]);
        assert_eq!(findings[0].severity(), Severity::High);
        assert_eq!(findings[0].location(), "api/users.js:1");
        assert!(findings[0].message().contains("required parameter 'email' added"));
    }

    #[test]
    fn test_changelog_entry_exempts() {
        let changes = modified("api/users.js", OLD_USERS, NEW_USERS).with_changed(
            "CHANGELOG.md",
            "# Changelog\n\n## [Unreleased]\n- BREAKING: getUser now requires email\n",
        );
        assert!(validator().inspect(&changes).is_empty());
    }

    #[test]
    fn test_changelog_without_release_heading() {
        let changes = modified("api/users.js", OLD_USERS, NEW_USERS)
            .with_previous("CHANGELOG.md", "# Changelog\n")
            .with_changed("CHANGELOG.md", "# Changelog\n- getUser now requires email\n");
        let findings = validator().inspect(&changes);
        assert_eq!(rules(&findings), vec![CHANGELOG_FORMAT]);
        assert_eq!(findings[0].severity(), Severity::Medium);
        assert_eq!(findings[0].file_path(), "CHANGELOG.md");
    }

    #[test]
    fn test_changelog_must_be_added_line() {
        let changes = modified("api/users.js", OLD_USERS, NEW_USERS)
            .with_previous("CHANGELOG.md", "## [1.0.0]\n- getUser added\n")
            .with_changed("CHANGELOG.md", "## [1.0.0]\n- getUser added\n- unrelated fix\n");
        assert_eq!(
            rules(&validator().inspect(&changes)),
            vec![INCOMPATIBLE_SIGNATURE]
        );
    }

    #[test]
    fn test_optional_parameter_added_is_compatible() {
        let changes = modified(
            "svc.py",
            "def fetch(url):\n    pass\n",
            "def fetch(url, timeout=30):\n    pass\n",
        );
        assert!(validator().inspect(&changes).is_empty());
    }

    #[test]
    fn test_python_reorder_and_optionality() {
        let changes = modified(
            "geo.py",
            "def move(x, y):\n    pass\n\ndef scale(f, k=2):\n    pass\n",
            "def move(y, x):\n    pass\n\ndef scale(f, k):\n    pass\n",
        );
        let findings = validator().inspect(&changes);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].message().contains("parameters reordered"));
        assert!(findings[1].message().contains("'k' is no longer optional"));
    }

    #[test]
    fn test_removed_symbol() {
        let changes = modified(
            "lib.py",
            "def keep():\n    pass\n\ndef gone():\n    pass\n\ndef _private():\n    pass\n",
            "def keep():\n    pass\n",
        );
        let findings = validator().inspect(&changes);
        assert_eq!(rules(&findings), vec![REMOVED_PUBLIC_SYMBOL]);
        assert!(findings[0].message().contains("'gone'"));
        assert_eq!(findings[0].location(), "lib.py");
    }

    #[test]
    fn test_return_type_changed() {
        let old = "def total(items) -> int:\n    pass\n";
        let new = "def total(items) -> float:\n    pass\n";
        let findings = validator().inspect(&modified("calc.py", old, new));
        assert_eq!(rules(&findings), vec![RETURN_TYPE_CHANGED]);

        let lenient = BreakingChangesValidator::new(BreakingChangesSettings {
            check_return_types: false,
            ..Default::default()
        })
        .unwrap();
        assert!(lenient.inspect(&modified("calc.py", old, new)).is_empty());
    }

    #[test]
    fn test_removed_module() {
        let changes = ChangeSet::new("t", "")
            .with_previous("pkg/legacy.py", "def old_api():\n    pass\n");
        let findings = validator().inspect(&changes);
        assert_eq!(rules(&findings), vec![REMOVED_PUBLIC_MODULE]);

        let noted = changes.with_changed(
            "CHANGELOG.md",
            "## [Unreleased]\n- Removed the legacy module\n",
        );
        assert!(validator().inspect(&noted).is_empty());
    }

    #[test]
    fn test_destructive_migration() {
        let changes = ChangeSet::new("t", "").with_changed(
            "db/migrations/0002_drop_email.sql",
            "-- cleanup\nALTER TABLE users DROP COLUMN email;\n",
        );
        let findings = validator().inspect(&changes);
        assert_eq!(rules(&findings), vec![DESTRUCTIVE_MIGRATION]);
        assert_eq!(findings[0].line_number(), Some(2));
    }

    #[test]
    fn test_unparseable_new_content() {
        let changes = modified("bin.py", "def f():\n    pass\n", "\0\0");
        assert_eq!(rules(&validator().inspect(&changes)), vec!["parse-error"]);
    }

    #[test]
    fn test_positional_rename_is_compatible() {
        let old = [Param { name: "id".into(), optional: false }];
        let new = [Param { name: "userId".into(), optional: false }];
        assert_eq!(incompatibility(Some(SourceLanguage::JavaScript), &old, &new), None);
        assert!(incompatibility(Some(SourceLanguage::Python), &old, &new).is_some());
    }
}
