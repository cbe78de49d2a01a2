//! End-to-end evaluation scenarios against the default configuration.

use mergegate::finding::{Category, Finding, Severity};
use mergegate::ledger::{OverrideLedger, OverrideRequest};
use mergegate::report::{render_json, render_text, ReportEntry};
use mergegate::validators::{SecurityValidator, ValidatorMode, ValidatorRegistry};
use mergegate::{
    ChangeSet, EvaluationMode, GateConfig, MockValidator, QualityOrchestrator, Verdict,
    VerdictPolicy,
};
use proptest::prelude::*;

/// 60 characters.
const JUSTIFICATION: &str = "Test fixture key never deployed; rotated and revoked in 2024";

fn orchestrator() -> QualityOrchestrator {
    QualityOrchestrator::from_config(&GateConfig::default()).unwrap()
}

fn api_key_change() -> ChangeSet {
    ChangeSet::new("Add payment client", "").with_changed("config.py", "API_KEY = \"sk_live_abcdef\"\n")
}

const OLD_USERS: &str = "export function getUser(id) {\n  return db.find(id);\n}\n";
const NEW_USERS: &str = "export function getUser(id, email) {\n  return db.find(id, email);\n}\n";

fn signature_change() -> ChangeSet {
    ChangeSet::new("Require email for lookups", "")
        .with_previous("api/users.js", OLD_USERS)
        .with_changed("api/users.js", NEW_USERS)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn hardcoded_credential_fails_the_gate() {
    let report = orchestrator()
        .evaluate(&api_key_change(), &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;

    assert_eq!(report.entries.len(), 1);
    let finding = &report.entries[0].finding;
    assert_eq!(finding.rule_id(), "hardcoded-credential");
    assert_eq!(finding.severity(), Severity::Critical);
    assert_eq!(report.severity_counts.critical, 1);
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test]
async fn long_hook_call_does_not_hide_credential() {
    let mut content = String::from("const API_KEY = \"sk_live_abcdef123\";\n\nfunction App() {\n  useEffect(() => {\n");
    for i in 0..55 {
        content.push_str(&format!("    refresh{}();\n", i));
    }
    content.push_str("  }, []);\n}\n");
    let changes = ChangeSet::new("Add app shell", "").with_changed("app.js", content);

    let report = orchestrator()
        .evaluate(&changes, &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;

    assert!(report.findings().all(|f| f.rule_id() != "parse-error"));
    assert!(report.findings().any(|f| f.rule_id() == "hardcoded-credential"));
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test]
async fn global_override_suppresses_without_hiding() {
    assert_eq!(JUSTIFICATION.chars().count(), 60);
    let ledger = OverrideLedger::in_memory();
    ledger
        .record(OverrideRequest::new("hardcoded-credential", "security-lead", JUSTIFICATION))
        .unwrap();

    let report = orchestrator()
        .evaluate(&api_key_change(), &ledger, EvaluationMode::Error)
        .await;

    assert!(report.findings().any(|f| f.rule_id() == "hardcoded-credential"));
    assert_eq!(report.suppressed_rule_ids, vec!["hardcoded-credential"]);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test]
async fn signature_change_needs_changelog() {
    let report = orchestrator()
        .evaluate(&signature_change(), &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].finding.severity(), Severity::High);
    assert_eq!(report.entries[0].finding.rule_id(), "incompatible-signature");
    assert_eq!(report.verdict, Verdict::Fail);

    let documented = signature_change().with_changed(
        "CHANGELOG.md",
        "# Changelog\n\n## [Unreleased]\n- `getUser` now requires an email address\n",
    );
    let report = orchestrator()
        .evaluate(&documented, &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;
    assert!(report.is_empty());
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test]
async fn untested_function_in_warning_mode_passes() {
    let changes = ChangeSet::new("Add helpers", "")
        .with_changed("src/calc.py", "def add(a, b):\n    return a + b\n");
    let report = orchestrator()
        .evaluate(&changes, &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.finding.rule_id(), "untested-function");
    assert_eq!(entry.finding.severity(), Severity::Medium);
    assert_eq!(entry.mode, ValidatorMode::Warning);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test]
async fn architecture_in_error_mode_keeps_default_layers() {
    let config: GateConfig = toml::from_str("[validators.architecture]\nmode = \"error\"\n").unwrap();
    let changes = ChangeSet::new("Model helper", "")
        .with_changed("app/models/user.py", "from app.api.routes import router\n");

    let report = QualityOrchestrator::from_config(&config)
        .unwrap()
        .evaluate(&changes, &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;

    let violation = report
        .entries
        .iter()
        .find(|e| e.finding.rule_id() == "layer-violation")
        .expect("layer violation reported");
    assert_eq!(violation.mode, ValidatorMode::Error);
}

#[test]
fn short_justification_leaves_ledger_unchanged() {
    let ledger = OverrideLedger::in_memory();
    ledger
        .record(OverrideRequest::new("sql-injection", "alice", JUSTIFICATION))
        .unwrap();
    let before = ledger.current_overrides().len();

    let err = ledger
        .record(OverrideRequest::new("timeout", "alice", "too short to count!!"))
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(ledger.current_overrides().len(), before);
    assert_eq!(ledger.history().len(), 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn evaluation_is_deterministic() {
    let changes = signature_change()
        .with_changed("config.py", "API_KEY = \"sk_live_abcdef\"\n")
        .with_changed("src/calc.py", "def add(a, b):\n    return a + b\n");
    let ledger = OverrideLedger::in_memory();
    let orchestrator = orchestrator();

    let first = orchestrator.evaluate(&changes, &ledger, EvaluationMode::Error).await;
    let second = orchestrator.evaluate(&changes, &ledger, EvaluationMode::Error).await;

    assert_eq!(render_text(&first), render_text(&second));
    assert_eq!(render_json(&first), render_json(&second));
}

#[test]
fn recording_the_same_override_twice_keeps_one_current_entry() {
    let ledger = OverrideLedger::in_memory();
    let request = OverrideRequest::new("n-plus-one-query", "bob", JUSTIFICATION).for_file("app/orders.py");

    ledger.record(request.clone()).unwrap();
    ledger.record(request).unwrap();

    assert_eq!(ledger.current_overrides().len(), 1);
    let history = ledger.history();
    assert_eq!(history.len(), 2);
    assert_eq!(
        ledger.current_overrides().values().next().unwrap().sequence,
        history[1].sequence
    );
}

#[tokio::test]
async fn crashed_validator_yields_one_synthetic_finding() {
    let registry = ValidatorRegistry::new()
        .with(MockValidator::new("flaky").panicking("index out of range"), ValidatorMode::Error)
        .with(
            SecurityValidator::new(Default::default()).unwrap(),
            ValidatorMode::Error,
        );

    let report = QualityOrchestrator::new(registry)
        .evaluate(&api_key_change(), &OverrideLedger::in_memory(), EvaluationMode::Error)
        .await;

    let failures: Vec<_> = report
        .findings()
        .filter(|f| f.rule_id() == "validator-failure")
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message().contains("flaky"));
    assert!(report.findings().any(|f| f.rule_id() == "hardcoded-credential"));
}

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

fn entry_strategy() -> impl Strategy<Value = ReportEntry> {
    (severity_strategy(), any::<bool>(), any::<bool>()).prop_map(|(severity, error_mode, suppressed)| {
        ReportEntry {
            finding: Finding::new(Category::Security, severity, "rule", "generated"),
            validator: "generated".into(),
            mode: if error_mode { ValidatorMode::Error } else { ValidatorMode::Warning },
            suppressed,
        }
    })
}

proptest! {
    #[test]
    fn adding_a_blocking_critical_always_fails(entries in prop::collection::vec(entry_strategy(), 0..20)) {
        let policy = VerdictPolicy::default();
        let mut entries = entries;
        entries.push(ReportEntry {
            finding: Finding::new(Category::Security, Severity::Critical, "new", "critical"),
            validator: "security".into(),
            mode: ValidatorMode::Error,
            suppressed: false,
        });
        prop_assert_eq!(policy.decide(&entries, EvaluationMode::Error), Verdict::Fail);
    }

    #[test]
    fn removing_blocking_findings_passes(entries in prop::collection::vec(entry_strategy(), 0..20)) {
        let policy = VerdictPolicy::default();
        let remaining: Vec<ReportEntry> = entries
            .into_iter()
            .filter(|e| !(e.counts_toward_verdict() && e.finding.severity() >= Severity::High))
            .collect();
        prop_assert_eq!(policy.decide(&remaining, EvaluationMode::Error), Verdict::Pass);
    }

    #[test]
    fn suppressed_findings_never_fail_on_their_own(severities in prop::collection::vec(severity_strategy(), 1..10)) {
        let policy = VerdictPolicy::default();
        let entries: Vec<ReportEntry> = severities
            .into_iter()
            .map(|severity| ReportEntry {
                finding: Finding::new(Category::Security, severity, "rule", "suppressed"),
                validator: "security".into(),
                mode: ValidatorMode::Error,
                suppressed: true,
            })
            .collect();
        prop_assert_eq!(policy.decide(&entries, EvaluationMode::Error), Verdict::Pass);
    }

    #[test]
    fn warning_mode_always_passes(entries in prop::collection::vec(entry_strategy(), 0..20)) {
        prop_assert_eq!(VerdictPolicy::default().decide(&entries, EvaluationMode::Warning), Verdict::Pass);
    }
}
