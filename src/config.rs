//! Gate configuration.
//!
//! Configuration is read from `mergegate.toml` (or `.mergegate.toml`) in the
//! project directory, or from an explicit TOML or JSON file. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ```toml
//! mode = "error"
//!
//! [validators.security]
//! mode = "error"
//! parameters = { exclude = ["fixtures/**"] }
//!
//! [validators.performance]
//! enabled = false
//!
//! [verdict]
//! block_on_critical = true
//! high_severity_threshold = 0
//!
//! [execution]
//! timeout_per_file_ms = 2000
//! parallel = true
//! ```

use crate::error::{GateError, Result};
use crate::finding::Severity;
use crate::validators::{ValidatorKind, ValidatorMode, ValidatorRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File names searched by [`GateConfig::discover`], in order.
pub const CONFIG_FILE_NAMES: [&str; 2] = ["mergegate.toml", ".mergegate.toml"];

// ============================================================================
// Evaluation mode
// ============================================================================

/// Global mode for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    /// Report only; the verdict is always pass.
    Warning,
    /// Error-mode validators may fail the verdict.
    #[default]
    Error,
}

impl std::fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "Invalid mode '{}'. Valid options: warning, error",
                other
            )),
        }
    }
}

// ============================================================================
// Validators
// ============================================================================

/// Settings for one validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Mode for this validator. Unset means the validator's default mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ValidatorMode>,

    /// Validator-specific settings, checked when the registry is built.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: None,
            parameters: Map::new(),
        }
    }
}

impl ValidatorConfig {
    fn with_mode(mode: ValidatorMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }
}

/// Per-validator settings, keyed by validator name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorsConfig {
    #[serde(default = "default_security")]
    pub security: ValidatorConfig,
    #[serde(
        default = "default_architecture",
        deserialize_with = "architecture_with_default_layers"
    )]
    pub architecture: ValidatorConfig,
    #[serde(default = "default_test_coverage")]
    pub test_coverage: ValidatorConfig,
    #[serde(default = "default_performance")]
    pub performance: ValidatorConfig,
    #[serde(default = "default_breaking_changes")]
    pub breaking_changes: ValidatorConfig,
}

fn default_true() -> bool {
    true
}

fn default_security() -> ValidatorConfig {
    ValidatorConfig::with_mode(ValidatorMode::Error)
}

fn default_architecture() -> ValidatorConfig {
    let layers = json!({
        "layers": [
            { "name": "presentation", "paths": ["**/api/**", "**/controllers/**", "**/routes/**"] },
            { "name": "service", "paths": ["**/services/**", "**/business/**"] },
            { "name": "persistence", "paths": ["**/repositories/**", "**/data/**"] },
            { "name": "domain", "paths": ["**/models/**", "**/entities/**", "**/domain/**"] }
        ],
        "allowed": {
            "presentation": ["service", "domain"],
            "service": ["persistence", "domain"],
            "persistence": ["domain"]
        }
    });
    ValidatorConfig {
        parameters: match layers {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        ..ValidatorConfig::with_mode(ValidatorMode::Warning)
    }
}

/// A table that names no layers keeps the default layers and their allowed
/// dependencies. Layers given without `allowed` get no default allowances.
fn architecture_with_default_layers<'de, D>(deserializer: D) -> std::result::Result<ValidatorConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut config = ValidatorConfig::deserialize(deserializer)?;
    if !config.parameters.contains_key("layers") {
        for (key, value) in default_architecture().parameters {
            config.parameters.entry(key).or_insert(value);
        }
    }
    Ok(config)
}

fn default_test_coverage() -> ValidatorConfig {
    ValidatorConfig::with_mode(ValidatorMode::Warning)
}

fn default_performance() -> ValidatorConfig {
    ValidatorConfig::with_mode(ValidatorMode::Warning)
}

fn default_breaking_changes() -> ValidatorConfig {
    ValidatorConfig::with_mode(ValidatorMode::Error)
}

impl Default for ValidatorsConfig {
    fn default() -> Self {
        Self {
            security: default_security(),
            architecture: default_architecture(),
            test_coverage: default_test_coverage(),
            performance: default_performance(),
            breaking_changes: default_breaking_changes(),
        }
    }
}

impl ValidatorsConfig {
    #[must_use]
    pub fn get(&self, kind: ValidatorKind) -> &ValidatorConfig {
        match kind {
            ValidatorKind::Security => &self.security,
            ValidatorKind::Architecture => &self.architecture,
            ValidatorKind::TestCoverage => &self.test_coverage,
            ValidatorKind::Performance => &self.performance,
            ValidatorKind::BreakingChanges => &self.breaking_changes,
        }
    }

    pub fn get_mut(&mut self, kind: ValidatorKind) -> &mut ValidatorConfig {
        match kind {
            ValidatorKind::Security => &mut self.security,
            ValidatorKind::Architecture => &mut self.architecture,
            ValidatorKind::TestCoverage => &mut self.test_coverage,
            ValidatorKind::Performance => &mut self.performance,
            ValidatorKind::BreakingChanges => &mut self.breaking_changes,
        }
    }

    /// The mode a validator runs in: `off` when disabled, otherwise its
    /// configured mode or the validator's default.
    #[must_use]
    pub fn effective_mode(&self, kind: ValidatorKind) -> ValidatorMode {
        let entry = self.get(kind);
        if !entry.enabled {
            return ValidatorMode::Off;
        }
        entry.mode.unwrap_or_else(|| default_mode(kind))
    }
}

/// Mode used when a validator's configuration does not name one.
#[must_use]
pub fn default_mode(kind: ValidatorKind) -> ValidatorMode {
    match kind {
        ValidatorKind::Security | ValidatorKind::BreakingChanges => ValidatorMode::Error,
        ValidatorKind::Architecture | ValidatorKind::TestCoverage | ValidatorKind::Performance => {
            ValidatorMode::Warning
        }
    }
}

// ============================================================================
// Verdict, execution, ledger
// ============================================================================

/// Policy turning findings into pass/fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerdictConfig {
    /// Fail on any unsuppressed error-mode finding at or above
    /// `critical_cutoff`.
    #[serde(default = "default_true")]
    pub block_on_critical: bool,

    /// Fail when more than this many unsuppressed error-mode findings sit at
    /// or above `high_cutoff`.
    #[serde(default)]
    pub high_severity_threshold: u32,

    #[serde(default = "default_critical_cutoff")]
    pub critical_cutoff: Severity,

    #[serde(default = "default_high_cutoff")]
    pub high_cutoff: Severity,
}

fn default_critical_cutoff() -> Severity {
    Severity::Critical
}

fn default_high_cutoff() -> Severity {
    Severity::High
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            block_on_critical: true,
            high_severity_threshold: 0,
            critical_cutoff: default_critical_cutoff(),
            high_cutoff: default_high_cutoff(),
        }
    }
}

/// How validators are scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Budget per file in the change set; a validator gets this times the
    /// file count (at least one file).
    #[serde(default = "default_timeout_per_file_ms")]
    pub timeout_per_file_ms: u64,

    /// Run validators concurrently.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_timeout_per_file_ms() -> u64 {
    2000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_per_file_ms: default_timeout_per_file_ms(),
            parallel: true,
        }
    }
}

impl ExecutionConfig {
    /// Time a single validator may spend on a change of `file_count` files.
    #[must_use]
    pub fn timeout_budget(&self, file_count: usize) -> Duration {
        let files = u64::try_from(file_count.max(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.timeout_per_file_ms.saturating_mul(files))
    }
}

/// Where overrides are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// JSONL file, relative to the project directory unless absolute.
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".mergegate/overrides.jsonl")
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

impl LedgerConfig {
    #[must_use]
    pub fn resolve(&self, project_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            project_dir.join(&self.path)
        }
    }
}

// ============================================================================
// GateConfig
// ============================================================================

/// Complete gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    #[serde(default)]
    pub mode: EvaluationMode,

    #[serde(default)]
    pub validators: ValidatorsConfig,

    #[serde(default)]
    pub verdict: VerdictConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl GateConfig {
    /// Load and validate a configuration file. Files ending in `.json` are
    /// parsed as JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file cannot be read, does not
    /// parse, or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GateError::config_with_path(format!("cannot read {}: {}", path.display(), e), path.to_path_buf())
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Self = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                GateError::config_with_path(format!("{}: {}", path.display(), e), path.to_path_buf())
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                GateError::config_with_path(format!("{}: {}", path.display(), e), path.to_path_buf())
            })?
        };

        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load the first configuration file found in `project_dir`, or the
    /// defaults when there is none.
    pub fn discover(project_dir: &Path) -> Result<Self> {
        for name in CONFIG_FILE_NAMES {
            let candidate = project_dir.join(name);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        tracing::debug!(dir = %project_dir.display(), "No configuration file, using defaults");
        Ok(Self::default())
    }

    /// Check cross-field constraints and every validator's parameters.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        self.validate_policy()?;
        ValidatorRegistry::from_config(self).map(|_| ())
    }

    /// Cross-field constraints on the verdict and execution settings.
    pub(crate) fn validate_policy(&self) -> Result<()> {
        if self.verdict.high_cutoff > self.verdict.critical_cutoff {
            return Err(GateError::invalid_config(
                "verdict.high_cutoff",
                format!(
                    "'{}' is above critical_cutoff '{}'",
                    self.verdict.high_cutoff.as_str(),
                    self.verdict.critical_cutoff.as_str()
                ),
            ));
        }
        if self.execution.timeout_per_file_ms == 0 {
            return Err(GateError::invalid_config(
                "execution.timeout_per_file_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Render as TOML, e.g. for `config show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GateError::config(format!("cannot render configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.mode, EvaluationMode::Error);
        assert!(config.verdict.block_on_critical);
        assert_eq!(config.verdict.high_severity_threshold, 0);
        assert_eq!(config.execution.timeout_per_file_ms, 2000);
        assert!(config.execution.parallel);
        assert_eq!(config.ledger.path, PathBuf::from(".mergegate/overrides.jsonl"));
        assert_eq!(
            config.validators.effective_mode(ValidatorKind::Security),
            ValidatorMode::Error
        );
        assert_eq!(
            config.validators.effective_mode(ValidatorKind::Performance),
            ValidatorMode::Warning
        );
        assert!(config.validators.architecture.parameters.contains_key("layers"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: GateConfig = toml::from_str("").unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mergegate.toml");
        std::fs::write(
            &path,
            r#"
mode = "warning"

[validators.security]
parameters = { exclude = ["fixtures/**"] }

[validators.performance]
enabled = false

[verdict]
high_severity_threshold = 2

[execution]
parallel = false
"#,
        )
        .unwrap();

        let config = GateConfig::load(&path).unwrap();
        assert_eq!(config.mode, EvaluationMode::Warning);
        assert_eq!(
            config.validators.effective_mode(ValidatorKind::Security),
            ValidatorMode::Error
        );
        assert_eq!(
            config.validators.effective_mode(ValidatorKind::Performance),
            ValidatorMode::Off
        );
        assert_eq!(config.verdict.high_severity_threshold, 2);
        assert!(!config.execution.parallel);
        assert_eq!(config.execution.timeout_per_file_ms, 2000);
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gate.json");
        std::fs::write(
            &path,
            r#"{"validators": {"test_coverage": {"mode": "error"}}, "verdict": {"block_on_critical": false}}"#,
        )
        .unwrap();

        let config = GateConfig::load(&path).unwrap();
        assert_eq!(
            config.validators.effective_mode(ValidatorKind::TestCoverage),
            ValidatorMode::Error
        );
        assert!(!config.verdict.block_on_critical);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mergegate.toml");
        std::fs::write(&path, "[verdict]\nblock_on_high = true\n").unwrap();
        let err = GateConfig::load(&path).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result: std::result::Result<GateConfig, _> =
            toml::from_str("[validators.security]\nmode = \"loud\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_parameters_fail_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mergegate.toml");
        std::fs::write(
            &path,
            "[validators.architecture.parameters]\nlayers = [{ name = \"a\", paths = [\"a/**\"] }]\nallowed = { a = [\"b\"] }\n",
        )
        .unwrap();
        let err = GateConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("validators.architecture.parameters.allowed"));
    }

    #[test]
    fn test_mode_only_architecture_keeps_default_layers() {
        let config: GateConfig = toml::from_str("[validators.architecture]\nmode = \"error\"\n").unwrap();
        assert_eq!(
            config.validators.effective_mode(ValidatorKind::Architecture),
            ValidatorMode::Error
        );
        assert_eq!(
            config.validators.architecture.parameters,
            default_architecture().parameters
        );

        let config: GateConfig =
            toml::from_str("[validators.architecture.parameters]\nexclude = [\"legacy/**\"]\n").unwrap();
        let parameters = &config.validators.architecture.parameters;
        assert!(parameters.contains_key("layers"));
        assert!(parameters.contains_key("allowed"));
        assert_eq!(parameters["exclude"], json!(["legacy/**"]));
    }

    #[test]
    fn test_custom_layers_replace_defaults() {
        let config: GateConfig = toml::from_str(
            "[validators.architecture.parameters]\nlayers = [{ name = \"core\", paths = [\"core/**\"] }]\n",
        )
        .unwrap();
        let parameters = &config.validators.architecture.parameters;
        assert_eq!(parameters["layers"].as_array().unwrap().len(), 1);
        assert!(!parameters.contains_key("allowed"));
        config.validate().unwrap();
    }

    #[test]
    fn test_inverted_cutoffs_rejected() {
        let mut config = GateConfig::default();
        config.verdict.high_cutoff = Severity::Critical;
        config.verdict.critical_cutoff = Severity::High;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("verdict.high_cutoff"));
    }

    #[test]
    fn test_discover() {
        let dir = TempDir::new().unwrap();
        assert_eq!(GateConfig::discover(dir.path()).unwrap(), GateConfig::default());

        std::fs::write(dir.path().join(".mergegate.toml"), "mode = \"warning\"\n").unwrap();
        let config = GateConfig::discover(dir.path()).unwrap();
        assert_eq!(config.mode, EvaluationMode::Warning);
    }

    #[test]
    fn test_timeout_budget_scales_with_files() {
        let execution = ExecutionConfig::default();
        assert_eq!(execution.timeout_budget(0), Duration::from_millis(2000));
        assert_eq!(execution.timeout_budget(3), Duration::from_millis(6000));
    }

    #[test]
    fn test_ledger_path_resolution() {
        let ledger = LedgerConfig::default();
        assert_eq!(
            ledger.resolve(Path::new("/repo")),
            PathBuf::from("/repo/.mergegate/overrides.jsonl")
        );
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GateConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: GateConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
