//! Integration tests for the mergegate CLI

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const JUSTIFICATION: &str = "Fixture credential for the sandbox tenant; rotated every deploy.";

/// Get a Command for the mergegate binary
fn mergegate(project: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("mergegate"));
    cmd.arg("--project").arg(project);
    cmd
}

fn write_payload(dir: &Path, changed: serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("payload.json");
    let payload = serde_json::json!({
        "pr_title": "Add client",
        "pr_description": "",
        "changed_files": changed,
        "previous_files": {}
    });
    std::fs::write(&path, payload.to_string()).unwrap();
    path
}

fn credential_payload(dir: &Path) -> std::path::PathBuf {
    write_payload(dir, serde_json::json!({ "config.py": "API_KEY = \"sk_live_abcdef\"\n" }))
}

#[test]
fn test_help() {
    Command::new(cargo::cargo_bin!("mergegate"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pre-merge quality gate"));
}

#[test]
fn test_version() {
    Command::new(cargo::cargo_bin!("mergegate"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

// ============================================================================
// check
// ============================================================================

#[test]
fn test_check_clean_payload_passes() {
    let temp = TempDir::new().unwrap();
    let payload = write_payload(temp.path(), serde_json::json!({ "docs/guide.md": "# Guide\n" }));

    mergegate(temp.path())
        .args(["check", "--payload"])
        .arg(&payload)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Quality gate: PASS"))
        .stdout(predicate::str::contains("No findings."));
}

#[test]
fn test_check_credential_fails_with_exit_one() {
    let temp = TempDir::new().unwrap();
    let payload = credential_payload(temp.path());

    mergegate(temp.path())
        .args(["check", "--payload"])
        .arg(&payload)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[hardcoded-credential] config.py:1"))
        .stdout(predicate::str::contains("mergegate override add"));
}

#[test]
fn test_check_warning_mode_never_fails() {
    let temp = TempDir::new().unwrap();
    let payload = credential_payload(temp.path());

    mergegate(temp.path())
        .args(["check", "--mode", "warning", "--payload"])
        .arg(&payload)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("mode: warning"));
}

#[test]
fn test_check_json_output() {
    let temp = TempDir::new().unwrap();
    let payload = credential_payload(temp.path());

    let output = mergegate(temp.path())
        .args(["check", "--format", "json", "--payload"])
        .arg(&payload)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["verdict"], "fail");
    assert_eq!(report["severity_counts"]["critical"], 1);
    assert_eq!(report["findings"][0]["rule_id"], "hardcoded-credential");
    assert!(report["suppressed_rule_ids"].as_array().unwrap().is_empty());
}

#[test]
fn test_check_directories() {
    let temp = TempDir::new().unwrap();
    let old = temp.path().join("old");
    let new = temp.path().join("new");
    std::fs::create_dir_all(old.join("api")).unwrap();
    std::fs::create_dir_all(new.join("api")).unwrap();
    std::fs::write(old.join("api/users.js"), "export function getUser(id) {\n  return db.find(id);\n}\n").unwrap();
    std::fs::write(
        new.join("api/users.js"),
        "export function getUser(id, email) {\n  return db.find(id, email);\n}\n",
    )
    .unwrap();

    mergegate(temp.path())
        .args(["check", "--new-dir"])
        .arg(&new)
        .arg("--old-dir")
        .arg(&old)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("incompatible-signature"));
}

#[test]
fn test_check_requires_a_source() {
    let temp = TempDir::new().unwrap();
    mergegate(temp.path()).arg("check").assert().code(2);
}

#[test]
fn test_check_invalid_config_exits_three() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("mergegate.toml"),
        "[validators.security.parameters]\nunknown_knob = true\n",
    )
    .unwrap();
    let payload = credential_payload(temp.path());

    mergegate(temp.path())
        .args(["check", "--payload"])
        .arg(&payload)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("validators.security.parameters"));
}

#[test]
fn test_check_disabled_validator() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("mergegate.toml"),
        "[validators.security]\nenabled = false\n",
    )
    .unwrap();
    let payload = credential_payload(temp.path());

    mergegate(temp.path())
        .args(["check", "--payload"])
        .arg(&payload)
        .assert()
        .code(0);
}

// ============================================================================
// override
// ============================================================================

#[test]
fn test_override_short_justification_exits_four() {
    let temp = TempDir::new().unwrap();

    mergegate(temp.path())
        .args([
            "override",
            "add",
            "--rule",
            "hardcoded-credential",
            "--author",
            "alice",
            "--justification",
            "because",
        ])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("at least 50 characters"));

    assert!(!temp.path().join(".mergegate/overrides.jsonl").exists());
}

#[test]
fn test_override_then_check_passes() {
    let temp = TempDir::new().unwrap();
    let payload = credential_payload(temp.path());

    mergegate(temp.path())
        .args([
            "override",
            "add",
            "--rule",
            "hardcoded-credential",
            "--file",
            "config.py",
            "--author",
            "alice",
            "--justification",
            JUSTIFICATION,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Override #0 recorded"));

    mergegate(temp.path())
        .args(["check", "--payload"])
        .arg(&payload)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("[suppressed]"))
        .stdout(predicate::str::contains("## Suppressed by override"));

    mergegate(temp.path())
        .args(["override", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hardcoded-credential @ config.py"));

    mergegate(temp.path())
        .args(["override", "verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ledger intact (1 entries)"));
}

#[test]
fn test_override_history_json() {
    let temp = TempDir::new().unwrap();
    for author in ["alice", "bob"] {
        mergegate(temp.path())
            .args([
                "override",
                "add",
                "--rule",
                "timeout",
                "--author",
                author,
                "--justification",
                JUSTIFICATION,
            ])
            .assert()
            .success();
    }

    let output = mergegate(temp.path())
        .args(["override", "history", "--json"])
        .output()
        .unwrap();
    let history: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[1]["author"], "bob");
}

#[test]
fn test_override_verify_detects_tampering() {
    let temp = TempDir::new().unwrap();
    mergegate(temp.path())
        .args([
            "override",
            "add",
            "--rule",
            "timeout",
            "--author",
            "alice",
            "--justification",
            JUSTIFICATION,
        ])
        .assert()
        .success();

    let ledger = temp.path().join(".mergegate/overrides.jsonl");
    let content = std::fs::read_to_string(&ledger).unwrap();
    std::fs::write(&ledger, content.replace("alice", "mallory")).unwrap();

    mergegate(temp.path())
        .args(["override", "verify"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Ledger corrupt"));
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_init_show_validate() {
    let temp = TempDir::new().unwrap();

    mergegate(temp.path())
        .args(["config", "init"])
        .assert()
        .success();
    assert!(temp.path().join("mergegate.toml").exists());

    mergegate(temp.path())
        .args(["config", "init"])
        .assert()
        .code(1);

    mergegate(temp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("high_severity_threshold = 0"));

    mergegate(temp.path())
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_rejects_inverted_cutoffs() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("mergegate.toml"),
        "[verdict]\ncritical_cutoff = \"high\"\nhigh_cutoff = \"critical\"\n",
    )
    .unwrap();

    mergegate(temp.path())
        .args(["config", "validate"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("verdict.high_cutoff"));
}
