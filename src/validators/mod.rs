//! Validators and the registry that enables them.
//!
//! Every validator implements one capability, [`Validator::inspect`], over a
//! [`ChangeSet`]. Validators hold only immutable settings, so the same
//! instance can be inspected concurrently and repeatedly.
//!
//! # Built-in validators
//!
//! | Kind | Category | Default mode |
//! |------|----------|--------------|
//! | security | security | error |
//! | architecture | architecture | warning |
//! | test_coverage | test_coverage | warning |
//! | performance | performance | warning |
//! | breaking_changes | breaking_change | error |

pub mod architecture;
pub mod breaking_changes;
pub mod performance;
pub mod security;
pub mod source;
pub mod test_coverage;

pub use architecture::{ArchitectureSettings, ArchitectureValidator, LayerSpec};
pub use breaking_changes::{BreakingChangesSettings, BreakingChangesValidator};
pub use performance::{PerformanceSettings, PerformanceValidator};
pub use security::{SecuritySettings, SecurityValidator};
pub use source::{ParseError, SourceFile, SourceLanguage};
pub use test_coverage::{TestCoverageSettings, TestCoverageValidator};

use crate::changes::ChangeSet;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::finding::{Category, Finding};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Validator trait
// ============================================================================

/// A rule-based inspection of a change set.
///
/// Implementations must not mutate shared state: `inspect` may run on any
/// thread, may be abandoned on timeout, and may be called again.
pub trait Validator: Send + Sync {
    /// Which built-in family this validator belongs to.
    fn kind(&self) -> ValidatorKind;

    /// Display name used in logs and reports.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Category assigned to synthetic findings (timeouts, crashes) for this
    /// validator.
    fn category(&self) -> Category {
        self.kind().category()
    }

    /// Inspect the change set and return findings in discovery order.
    fn inspect(&self, changes: &ChangeSet) -> Vec<Finding>;
}

/// The closed set of validator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    Security,
    Architecture,
    TestCoverage,
    Performance,
    BreakingChanges,
}

impl ValidatorKind {
    /// Canonical registration order.
    pub const ALL: [ValidatorKind; 5] = [
        ValidatorKind::Security,
        ValidatorKind::Architecture,
        ValidatorKind::TestCoverage,
        ValidatorKind::Performance,
        ValidatorKind::BreakingChanges,
    ];

    /// Name used as the configuration key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Architecture => "architecture",
            Self::TestCoverage => "test_coverage",
            Self::Performance => "performance",
            Self::BreakingChanges => "breaking_changes",
        }
    }

    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Security => Category::Security,
            Self::Architecture => Category::Architecture,
            Self::TestCoverage => Category::TestCoverage,
            Self::Performance => Category::Performance,
            Self::BreakingChanges => Category::BreakingChange,
        }
    }
}

impl std::fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a validator's findings affect the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    /// Never runs.
    Off,
    /// Findings are reported but never block.
    Warning,
    /// Findings may block.
    #[default]
    Error,
}

impl std::fmt::Display for ValidatorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ValidatorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "Invalid mode '{}'. Valid options: off, warning, error",
                other
            )),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A validator together with the mode it runs in.
#[derive(Clone)]
pub struct RegisteredValidator {
    pub validator: Arc<dyn Validator>,
    pub mode: ValidatorMode,
}

impl std::fmt::Debug for RegisteredValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredValidator")
            .field("name", &self.validator.name())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Ordered set of validators. Registration order is report order.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    entries: Vec<RegisteredValidator>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry described by `config`.
    ///
    /// Disabled validators and validators in `off` mode are skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a validator's parameters do not
    /// parse into its settings, or contain an invalid glob or pattern.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let mut registry = Self::new();
        for kind in ValidatorKind::ALL {
            let entry = config.validators.get(kind);
            let mode = config.validators.effective_mode(kind);
            if mode == ValidatorMode::Off {
                tracing::debug!(validator = kind.as_str(), "Validator disabled");
                continue;
            }
            let field = format!("validators.{}.parameters", kind.as_str());
            let validator: Arc<dyn Validator> = match kind {
                ValidatorKind::Security => Arc::new(SecurityValidator::new(
                    parse_settings(&entry.parameters, &field)?,
                )?),
                ValidatorKind::Architecture => Arc::new(ArchitectureValidator::new(
                    parse_settings(&entry.parameters, &field)?,
                )?),
                ValidatorKind::TestCoverage => Arc::new(TestCoverageValidator::new(
                    parse_settings(&entry.parameters, &field)?,
                )?),
                ValidatorKind::Performance => Arc::new(PerformanceValidator::new(
                    parse_settings(&entry.parameters, &field)?,
                )?),
                ValidatorKind::BreakingChanges => Arc::new(BreakingChangesValidator::new(
                    parse_settings(&entry.parameters, &field)?,
                )?),
            };
            registry.register(validator, mode);
        }
        Ok(registry)
    }

    /// Append a validator.
    pub fn register(&mut self, validator: Arc<dyn Validator>, mode: ValidatorMode) {
        self.entries.push(RegisteredValidator { validator, mode });
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, validator: impl Validator + 'static, mode: ValidatorMode) -> Self {
        self.register(Arc::new(validator), mode);
        self
    }

    /// Every registered validator, in registration order.
    #[must_use]
    pub fn entries(&self) -> &[RegisteredValidator] {
        &self.entries
    }

    /// Validators whose mode is not `off`, in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &RegisteredValidator> {
        self.entries
            .iter()
            .filter(|e| e.mode != ValidatorMode::Off)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Parse an opaque parameter map into a validator's settings.
///
/// Unknown keys are rejected by the settings types themselves.
pub(crate) fn parse_settings<T: DeserializeOwned>(
    parameters: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(parameters.clone()))
        .map_err(|e| GateError::invalid_config(field, e.to_string()))
}

/// Compile glob patterns, reporting the offending field on failure.
pub(crate) fn build_globset(field: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| GateError::invalid_config(field, format!("'{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| GateError::invalid_config(field, e.to_string()))
}

/// Case-insensitive variant of [`build_globset`].
pub(crate) fn build_globset_ci(field: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| GateError::invalid_config(field, format!("'{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| GateError::invalid_config(field, e.to_string()))
}

/// Parse a file, turning failure into a `parse-error` finding.
pub(crate) fn parse_source<'a>(
    category: Category,
    path: &'a str,
    content: &'a str,
) -> std::result::Result<SourceFile<'a>, Finding> {
    SourceFile::parse(path, content).map_err(|e| {
        tracing::warn!(path = path, reason = %e, "Could not analyse file");
        Finding::parse_error(category, path, &e.reason)
    })
}
