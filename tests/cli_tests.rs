use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

fn omr() -> Command {
    Command::cargo_bin("omr").expect("binary builds")
}

/// Renders a sample sheet and its key into a fresh directory.
fn sample_dir(extra: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let sheet = dir.path().join("sheets").join("alice.png");
    fs::create_dir_all(sheet.parent().unwrap()).unwrap();
    omr()
        .current_dir(dir.path())
        .args(["--keys-dir", "keys", "sample", "--write-key", "--sheet-version", "mock"])
        .args(["--questions", "12", "--subjects", "Math,Science"])
        .arg("--out")
        .arg(&sheet)
        .args(extra)
        .assert()
        .success();
    assert!(dir.path().join("keys").join("mock.json").is_file());
    dir
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_sample_then_grade_scores_full_marks() {
    let dir = sample_dir(&["--photo", "--rotate", "180"]);
    let output = omr()
        .current_dir(dir.path())
        .args(["--keys-dir", "keys", "grade", "sheets/alice.png", "--sheet-version", "mock"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let result = stdout_json(&output);
    assert_eq!(result["student_id"], "alice");
    assert_eq!(result["success"], true);
    assert_eq!(result["total_percentage"], 100.0);
    assert_eq!(result["subject_scores"].as_array().unwrap().len(), 2);
    assert_eq!(result["metadata"]["orientation"], 180);
}

#[test]
fn test_grade_with_unknown_version_fails() {
    let dir = sample_dir(&[]);
    let output = omr()
        .current_dir(dir.path())
        .args(["--keys-dir", "keys", "grade", "sheets/alice.png", "--sheet-version", "other"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let result = stdout_json(&output);
    assert_eq!(result["success"], false);
    assert_eq!(result["error"]["kind"], "unknown_version");
}

#[test]
fn test_batch_reports_every_file() {
    let dir = sample_dir(&[]);
    fs::write(dir.path().join("sheets").join("broken.png"), b"not really a png").unwrap();
    fs::write(dir.path().join("sheets").join("notes.txt"), b"ignored").unwrap();

    let output = omr()
        .current_dir(dir.path())
        .args(["--keys-dir", "keys", "batch", "sheets", "--sheet-version", "mock", "--summary-only"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["student_id"], "alice");
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["student_id"], "broken");
    assert_eq!(results[1]["error"]["kind"], "decode");
    assert_eq!(report["stats"]["failed"], 1);
    assert_eq!(report["stats"]["error_rate_exceeded"], true);
}

#[test]
fn test_check_key_summarizes() {
    let dir = sample_dir(&[]);
    let output = omr()
        .current_dir(dir.path())
        .args(["check-key", "keys/mock.json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let summary = stdout_json(&output);
    assert_eq!(summary["version"], "mock");
    assert_eq!(summary["total_questions"], 12);
    assert_eq!(summary["grid_declared"], true);
    assert_eq!(summary["subjects"][1]["name"], "Science");
}

#[test]
fn test_check_key_rejects_bad_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"{"version": "x", "subjects": {"S": {"questions": [1, 1], "answers": ["A", "B"]}}}"#)
        .unwrap();
    omr().arg("check-key").arg(&path).assert().failure();
}
