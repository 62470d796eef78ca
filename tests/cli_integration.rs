//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

/// Get the path to the built binary
fn canopy_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_canopy"))
}

/// Run canopy and return (stdout, stderr, success)
fn run_canopy(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(canopy_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute canopy");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn write_json(dir: &Path, name: &str, value: &Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
    path.to_str().unwrap().to_string()
}

fn fixture() -> (TempDir, String, String) {
    let dir = tempdir().unwrap();
    let base = write_json(
        dir.path(),
        "base.json",
        &json!({
            "m0": {"type": "HobbyKing"},
            "m1": {"v": 1.0, "type": "HobbyKing", "enabled": false, "meta": {"min": 0.0}},
            "m2": "test_motor",
            "s0": "test_sensor"
        }),
    );
    let patch = write_json(
        dir.path(),
        "patch.json",
        &json!({
            "m0": {"v": 2.0},
            "m1": {"v": 3.0, "enabled": null, "comment": "test_attr", "meta": {"min": -1.0}},
            "s0": null,
            "s1": {"type": "sensor"}
        }),
    );
    (dir, base, patch)
}

// ============================================================================
// Apply Tests
// ============================================================================

#[test]
fn test_cli_apply_merges_patch() {
    let (_dir, base, patch) = fixture();

    let (stdout, _stderr, success) = run_canopy(&["apply", &base, &patch]);
    assert!(success, "apply should succeed");

    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["status"], "ok");
    assert_eq!(
        result["tree"],
        json!({
            "m0": {"type": "HobbyKing", "v": 2.0},
            "m1": {"v": 3.0, "type": "HobbyKing", "comment": "test_attr", "meta": {"min": -1.0}},
            "m2": "test_motor",
            "s1": {"type": "sensor"}
        })
    );

    let changes = result["patches"][0]["changes"].as_array().unwrap();
    let paths: Vec<&str> = changes.iter().map(|c| c["path"].as_str().unwrap()).collect();
    assert!(paths.contains(&"m1.meta.min"));
    assert!(paths.contains(&"m1.enabled"));
    assert!(paths.contains(&"s0"));
    assert!(paths.contains(&"s1"));
    assert!(!paths.iter().any(|p| p.starts_with("m2")));

    let removed = changes.iter().find(|c| c["path"] == "s0").unwrap();
    assert_eq!(removed["kind"], "removed");
    assert_eq!(removed["old"], "test_sensor");
}

#[test]
fn test_cli_apply_without_patches_reports_nothing() {
    let (_dir, base, _patch) = fixture();

    let (stdout, _stderr, success) = run_canopy(&["apply", &base]);
    assert!(success);

    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["patches"], json!([]));
    assert_eq!(result["tree"]["m2"], "test_motor");
}

#[test]
fn test_cli_apply_cleanup_reclaims_empty_subtrees() {
    let (dir, base, _patch) = fixture();
    let patch = write_json(dir.path(), "empty.json", &json!({"m0": {"type": null}}));

    let (stdout, _stderr, success) = run_canopy(&["apply", "--cleanup", &base, &patch]);
    assert!(success);

    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert!(result["tree"].get("m0").is_none());
}

#[test]
fn test_cli_apply_missing_key_fails() {
    let (dir, base, _patch) = fixture();
    let patch = write_json(dir.path(), "bad.json", &json!({"nope": null}));

    let (_stdout, stderr, success) = run_canopy(&["apply", &base, &patch]);
    assert!(!success, "deleting a missing key should fail");
    assert!(stderr.contains("Missing key"), "stderr: {}", stderr);
}

#[test]
fn test_cli_apply_text_format() {
    let (_dir, base, patch) = fixture();

    let (stdout, _stderr, success) = run_canopy(&["-f", "text", "apply", &base, &patch]);
    assert!(success);
    assert!(stdout.contains("== "));
    assert!(stdout.contains("m1.meta.min: 0.0 -> -1.0"), "stdout: {}", stdout);
}

#[test]
fn test_cli_rejects_non_object_base() {
    let dir = tempdir().unwrap();
    let base = write_json(dir.path(), "list.json", &json!([1, 2, 3]));

    let (_stdout, _stderr, success) = run_canopy(&["apply", &base]);
    assert!(!success);
}

// ============================================================================
// Watch Tests
// ============================================================================

#[test]
fn test_cli_watch_reports_observed_paths_only() {
    let (_dir, base, patch) = fixture();

    let (stdout, _stderr, success) = run_canopy(&["watch", &base, &patch, "--path", "m1.meta"]);
    assert!(success);

    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["count"], 1);
    let event = &result["events"][0];
    assert_eq!(event["watch"], "m1.meta");
    assert_eq!(event["change"]["path"], "m1.meta.min");
    assert_eq!(event["change"]["old"], 0.0);
    assert_eq!(event["change"]["new"], -1.0);
}

#[test]
fn test_cli_watch_future_path() {
    let (_dir, base, patch) = fixture();

    let (stdout, _stderr, success) = run_canopy(&["watch", &base, &patch, "-p", "s1.type"]);
    assert!(success);

    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["count"], 1);
    assert_eq!(result["events"][0]["change"]["kind"], "added");
    assert_eq!(result["events"][0]["change"]["new"], "sensor");
}

#[test]
fn test_cli_watch_requires_path() {
    let (_dir, base, patch) = fixture();

    let (_stdout, _stderr, success) = run_canopy(&["watch", &base, &patch]);
    assert!(!success);
}

#[test]
fn test_cli_watch_help_mentions_dotted_keys() {
    let (stdout, _stderr, success) = run_canopy(&["watch", "--help"]);
    assert!(success);
    assert!(stdout.contains("DOTTED.PATH"));
    assert!(stdout.contains("cannot be watched"));
}
