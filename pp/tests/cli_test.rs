//! CLI tests for the `pp` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `pp` isolated from the user's config and log directories
fn pp(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pp").expect("binary built");
    cmd.current_dir(dir)
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("XDG_DATA_HOME", dir.join("data"))
        .env("HOME", dir)
        .env("NO_COLOR", "1");
    cmd
}

fn workspace() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        dir.path().join("main.prompt.md"),
        "---\ndescription: Main prompt\nmode: agent\n---\nUse #file:helper.prompt.md please\n",
    )
    .unwrap();
    fs::write(dir.path().join("helper.prompt.md"), "Back to [main](./main.prompt.md)\n").unwrap();
    dir
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    pp(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("parse"))
        .stdout(predicate::str::contains("refs"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_parse_prints_header_and_references() {
    let dir = workspace();
    pp(dir.path())
        .args(["parse", "main.prompt.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("description: Main prompt"))
        .stdout(predicate::str::contains("mode: agent"))
        .stdout(predicate::str::contains("helper.prompt.md"))
        .stdout(predicate::str::contains("Use #file:helper.prompt.md please"));
}

#[test]
fn test_parse_json_output() {
    let dir = workspace();
    let output = pp(dir.path())
        .args(["parse", "main.prompt.md", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["kind"], "prompt");
    assert_eq!(report["header"]["description"], "Main prompt");
    assert_eq!(report["references"][0]["path"], "helper.prompt.md");
    assert_eq!(report["body"], "Use #file:helper.prompt.md please\n");
    assert!(report["error"].is_null());
}

#[test]
fn test_parse_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    pp(dir.path())
        .args(["parse", "nope.prompt.md"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("open-failure"));
}

#[test]
fn test_parse_non_prompt_file_needs_flag() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.md"), "#file:a.prompt.md\n").unwrap();

    pp(dir.path())
        .args(["parse", "notes.md"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("not-a-prompt-file"));

    pp(dir.path())
        .args(["parse", "notes.md", "--allow-non-eligible"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.prompt.md"));
}

#[test]
fn test_refs_reports_recursion() {
    let dir = workspace();
    pp(dir.path())
        .args(["refs", "main.prompt.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recursive-reference"))
        .stdout(predicate::str::contains(
            "main.prompt.md -> helper.prompt.md -> main.prompt.md",
        ));
}

#[test]
fn test_refs_json_lists_references() {
    let dir = workspace();
    let output = pp(dir.path())
        .args(["refs", "main.prompt.md", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let references = report["references"].as_array().unwrap();
    assert_eq!(references.len(), 2);
    assert_eq!(report["errors"][0]["kind"], "recursive-reference");
}

#[test]
fn test_config_file_sets_max_depth() {
    let dir = workspace();
    fs::write(dir.path().join("pp.yml"), "resolver:\n  max-depth: 0\n").unwrap();
    pp(dir.path())
        .args(["refs", "main.prompt.md", "--config", "pp.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[truncated]"));
}
