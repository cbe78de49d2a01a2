//! Security validator.
//!
//! Pattern-based only: there is no dataflow analysis, so a credential read
//! from the environment and then logged is caught only when the logged
//! identifier itself has a sensitive name.
//!
//! Rules:
//!
//! - `hardcoded-credential` (critical): literal assigned to a credential-like
//!   identifier, private key headers, connection strings with a password.
//! - `sql-injection` (critical): SQL text on a line that also builds the
//!   string dynamically.
//! - `sensitive-data-logging` (high, critical for PII): logging calls whose
//!   argument identifiers look sensitive.
//! - `unsafe-deserialization` (critical, `yaml.load` high): deserializers and
//!   evaluators that execute input.

use super::{build_globset, parse_source, source::compile, SourceFile, Validator, ValidatorKind};
use crate::changes::ChangeSet;
use crate::error::{GateError, Result};
use crate::finding::{Category, Finding, Severity};
use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const HARDCODED_CREDENTIAL: &str = "hardcoded-credential";
pub const SQL_INJECTION: &str = "sql-injection";
pub const SENSITIVE_DATA_LOGGING: &str = "sensitive-data-logging";
pub const UNSAFE_DESERIALIZATION: &str = "unsafe-deserialization";

const CREDENTIAL_NAMES: &[&str] = &[
    "api[_-]?key",
    "apikey",
    "secret",
    "passw(?:or)?d",
    "pwd",
    "token",
    "access[_-]?key",
    "private[_-]?key",
    "client[_-]?secret",
    "credentials?",
];

/// Identifier endings that name something about a secret, not the secret.
const NON_SECRET_SUFFIXES: &[&str] = &[
    "_url", "_uri", "_path", "_file", "_name", "_type", "_field", "_env", "_var", "_header",
    "_endpoint", "_length", "_len", "izer",
];

const DEFAULT_PLACEHOLDERS: &[&str] = &[
    r"(?i)example",
    r"(?i)sample",
    r"(?i)dummy",
    r"(?i)change[_-]?me",
    r"(?i)placeholder",
    r"(?i)fake",
    r"(?i)mock",
    r"(?i)redacted",
    r"(?i)^your[_-]",
    r"(?i)xxx+",
    r"^\*+$",
    r"^<.*>$",
    r"\$\{.*\}",
    r"\{\{.*\}\}",
];

const PII_TERMS: &[&str] = &[
    "ssn",
    "social_security",
    "credit_card",
    "card_number",
    "cvv",
    "cvc",
];

const CREDENTIAL_TERMS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "private_key",
    "access_key",
    "credential",
    "credentials",
];

/// Parameters accepted under `validators.security.parameters`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecuritySettings {
    /// Additional identifier fragments (regex syntax) treated as credentials.
    pub extra_credential_names: Vec<String>,
    /// Additional patterns marking a literal as a placeholder.
    pub placeholder_patterns: Vec<String>,
    /// Paths never inspected.
    pub exclude: Vec<String>,
}

struct DeserializerRule {
    pattern: Regex,
    label: &'static str,
    severity: Severity,
    fix: &'static str,
}

/// Detects credentials, injection, sensitive logging and unsafe deserialization.
pub struct SecurityValidator {
    credential: Regex,
    private_key: Regex,
    connection_string: Regex,
    placeholders: Vec<Regex>,
    sql_statement: Vec<Regex>,
    sql_building: Vec<Regex>,
    log_call: Vec<Regex>,
    identifier: Vec<Regex>,
    deserializers: Vec<DeserializerRule>,
    exclude: GlobSet,
}

impl SecurityValidator {
    /// Build the validator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid extra pattern or glob.
    pub fn new(settings: SecuritySettings) -> Result<Self> {
        let field = "validators.security.parameters";

        let mut names: Vec<String> = CREDENTIAL_NAMES.iter().map(|s| s.to_string()).collect();
        names.extend(settings.extra_credential_names.iter().cloned());
        let credential = Regex::new(&format!(
            r#"(?i)(?P<ident>[A-Za-z_$][\w.$-]*?(?:{})[\w$]*)["']?\s*(?::=|=|:)\s*(?P<quote>["'`])(?P<value>[^"'`]{{4,}})["'`]"#,
            names.join("|")
        ))
        .map_err(|e| GateError::invalid_config(format!("{}.extra_credential_names", field), e.to_string()))?;

        let mut placeholders = compile(DEFAULT_PLACEHOLDERS);
        for pattern in &settings.placeholder_patterns {
            placeholders.push(Regex::new(pattern).map_err(|e| {
                GateError::invalid_config(format!("{}.placeholder_patterns", field), e.to_string())
            })?);
        }

        let deserializers = [
            (r"\b(?:c?[Pp]ickle|_pickle)\.loads?\s*\(", "pickle.load", Severity::Critical, "Use json.loads or another data-only format"),
            (r"\bmarshal\.loads?\s*\(", "marshal.load", Severity::Critical, "Use json.loads or another data-only format"),
            (r"(?:^|[^\w.])eval\s*\(", "eval()", Severity::Critical, "Avoid eval; parse literals with a safe parser such as ast.literal_eval"),
            (r"(?:^|[^\w.])exec\s*\(", "exec()", Severity::Critical, "Redesign to avoid executing dynamic code"),
            (r"\bnew\s+Function\s*\(", "new Function()", Severity::Critical, "Avoid constructing functions from strings"),
            (r"\bnew\s+ObjectInputStream\s*\(", "ObjectInputStream", Severity::Critical, "Use a data-only format or an ObjectInputFilter allow-list"),
            (r"(?:^|[^\w.])unserialize\s*\(", "unserialize()", Severity::Critical, "Use json_decode instead of unserialize"),
            (r"\byaml\.load\s*\(", "yaml.load without a safe loader", Severity::High, "Use yaml.safe_load or Loader=yaml.SafeLoader"),
        ]
        .into_iter()
        .filter_map(|(p, label, severity, fix)| {
            Regex::new(p).ok().map(|pattern| DeserializerRule {
                pattern,
                label,
                severity,
                fix,
            })
        })
        .collect();

        Ok(Self {
            credential,
            private_key: Regex::new(
                r"-----BEGIN (?:RSA |DSA |EC |OPENSSH |ENCRYPTED |PGP )?PRIVATE KEY(?: BLOCK)?-----",
            )
            .map_err(|e| GateError::invalid_config(field, e.to_string()))?,
            connection_string: Regex::new(
                r#"(?i)\b[a-z][a-z0-9+.-]*://[^\s:/@"']+:(?P<password>[^\s@"'/]+)@"#,
            )
            .map_err(|e| GateError::invalid_config(field, e.to_string()))?,
            placeholders,
            sql_statement: compile(&[
                r"(?i)\bSELECT\s+.+?\s+FROM\b",
                r"(?i)\bINSERT\s+INTO\b",
                r"(?i)\bUPDATE\s+[\w.`\x22\[\]]+\s+SET\b",
                r"(?i)\bDELETE\s+FROM\b",
                r"(?i)\b(?:DROP|CREATE|ALTER|TRUNCATE)\s+TABLE\b",
            ]),
            sql_building: compile(&[
                r#"["'`]\s*\+\s*[\w(]"#,
                r#"[\w)\]]\s*\+\s*["'`]"#,
                r#"(?i)(?:^|[^\w])(?:f|rf|fr)["']"#,
                r"`[^`]*\$\{",
                r"\.format\s*\(",
                r#"["']\s*%\s*[\w(]"#,
                r"\bformat!\s*\(",
                r"\b(?:fmt\.)?Sprintf\s*\(",
                r"\bString\.format\s*\(",
            ]),
            log_call: compile(&[
                r"(?i)\b(?:logger|logging|log|console|tracing|slog|logrus)\s*(?:\.|::)\s*\w+!?\s*\(",
                r"\bSystem\.(?:out|err)\.print\w*\s*\(",
                r"(?:^|[^\w.])(?:print|println!|print!|eprintln!|eprint!|printf|puts|info!|warn!|error!|debug!|trace!)\s*\(",
                r"\bfmt\.Print\w*\s*\(",
            ]),
            identifier: compile(&[r"[A-Za-z_][A-Za-z0-9_]*"]),
            deserializers,
            exclude: build_globset(&format!("{}.exclude", field), &settings.exclude)?,
        })
    }

    fn inspect_file(&self, file: &SourceFile<'_>, findings: &mut Vec<Finding>) {
        let path = file.path();
        for (idx, line) in file.lines().iter().enumerate() {
            let line_no = u32::try_from(idx + 1).unwrap_or(u32::MAX);

            if let Some(finding) = self.check_private_key(path, line, line_no) {
                findings.push(finding);
                continue;
            }
            if file.is_comment(line) {
                continue;
            }
            if let Some(finding) = self.check_credential(path, line, line_no) {
                findings.push(finding);
            }
            if let Some(finding) = self.check_sql(path, line, line_no) {
                findings.push(finding);
            }
            let code = file.code_of(line);
            if let Some(finding) = self.check_logging(path, &code, line_no) {
                findings.push(finding);
            }
            if let Some(finding) = self.check_deserialization(path, line, &code, line_no) {
                findings.push(finding);
            }
        }
    }

    fn is_placeholder(&self, value: &str) -> bool {
        self.placeholders.iter().any(|re| re.is_match(value))
    }

    fn check_private_key(&self, path: &str, line: &str, line_no: u32) -> Option<Finding> {
        self.private_key.is_match(line).then(|| {
            Finding::new(
                Category::Security,
                Severity::Critical,
                HARDCODED_CREDENTIAL,
                "Private key material committed to the repository",
            )
            .with_location(path, line_no)
            .with_suggested_fix("Remove the key, rotate it, and load it from a secrets manager at runtime")
        })
    }

    fn check_credential(&self, path: &str, line: &str, line_no: u32) -> Option<Finding> {
        for caps in self.credential.captures_iter(line) {
            let ident = &caps["ident"];
            let value = &caps["value"];
            let lower = ident.to_lowercase();
            if NON_SECRET_SUFFIXES.iter().any(|s| lower.ends_with(s)) || self.is_placeholder(value) {
                continue;
            }
            return Some(
                Finding::new(
                    Category::Security,
                    Severity::Critical,
                    HARDCODED_CREDENTIAL,
                    format!("Hardcoded credential assigned to '{}'", ident),
                )
                .with_location(path, line_no)
                .with_suggested_fix(format!(
                    "Load '{}' from the environment or a secrets manager, e.g. os.getenv(\"{}\")",
                    ident,
                    ident.to_uppercase()
                )),
            );
        }

        let caps = self.connection_string.captures(line)?;
        if self.is_placeholder(&caps["password"]) {
            return None;
        }
        Some(
            Finding::new(
                Category::Security,
                Severity::Critical,
                HARDCODED_CREDENTIAL,
                "Connection string with an embedded password",
            )
            .with_location(path, line_no)
            .with_suggested_fix("Build the connection string from environment variables"),
        )
    }

    fn check_sql(&self, path: &str, line: &str, line_no: u32) -> Option<Finding> {
        let has_sql = self.sql_statement.iter().any(|re| re.is_match(line));
        let dynamic = has_sql && self.sql_building.iter().any(|re| re.is_match(line));
        dynamic.then(|| {
            Finding::new(
                Category::Security,
                Severity::Critical,
                SQL_INJECTION,
                "SQL statement built from dynamic string content",
            )
            .with_location(path, line_no)
            .with_suggested_fix(
                "Use a parameterized query, e.g. cursor.execute(\"SELECT * FROM users WHERE id = %s\", (user_id,))",
            )
        })
    }

    fn check_logging(&self, path: &str, code: &str, line_no: u32) -> Option<Finding> {
        let call = self.log_call.iter().find_map(|re| re.find(code))?;
        let arguments = &code[call.end()..];

        let mut pii: Option<&str> = None;
        let mut credential: Option<&str> = None;
        for re in &self.identifier {
            for ident in re.find_iter(arguments) {
                let words = identifier_words(ident.as_str());
                if pii.is_none() {
                    pii = PII_TERMS.iter().copied().find(|t| contains_term(&words, t));
                }
                if credential.is_none() {
                    credential = CREDENTIAL_TERMS.iter().copied().find(|t| contains_term(&words, t));
                }
            }
        }

        let (severity, term) = match (pii, credential) {
            (Some(term), _) => (Severity::Critical, term),
            (None, Some(term)) => (Severity::High, term),
            (None, None) => return None,
        };
        Some(
            Finding::new(
                Category::Security,
                severity,
                SENSITIVE_DATA_LOGGING,
                format!("Logging call may expose sensitive data ({})", term.replace('_', " ")),
            )
            .with_location(path, line_no)
            .with_suggested_fix("Redact the value or exclude the field from structured logging"),
        )
    }

    fn check_deserialization(&self, path: &str, line: &str, code: &str, line_no: u32) -> Option<Finding> {
        let rule = self
            .deserializers
            .iter()
            .find(|rule| rule.pattern.is_match(code))?;
        if rule.severity == Severity::High && line.contains("SafeLoader") {
            return None;
        }
        Some(
            Finding::new(
                Category::Security,
                rule.severity,
                UNSAFE_DESERIALIZATION,
                format!("Unsafe deserialization: {} can execute attacker-controlled input", rule.label),
            )
            .with_location(path, line_no)
            .with_suggested_fix(rule.fix),
        )
    }
}

impl Validator for SecurityValidator {
    fn kind(&self) -> ValidatorKind {
        ValidatorKind::Security
    }

    fn inspect(&self, changes: &ChangeSet) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (path, content) in changes.changed_files() {
            if self.exclude.is_match(path) {
                continue;
            }
            match parse_source(Category::Security, path, content) {
                Ok(file) => self.inspect_file(&file, &mut findings),
                Err(finding) => {
                    findings.push(finding);
                    // Line rules do not need definitions.
                    if let Some(file) = SourceFile::lines_only(path, content) {
                        self.inspect_file(&file, &mut findings);
                    }
                }
            }
        }
        findings
    }
}

/// Split an identifier into lowercase words on `_`, `-` and camelCase
/// boundaries.
fn identifier_words(ident: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in ident.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Whether `term` (underscore-separated words) appears as consecutive words.
fn contains_term(words: &[String], term: &str) -> bool {
    let joined = format!("_{}_", words.join("_"));
    joined.contains(&format!("_{}_", term))
}
