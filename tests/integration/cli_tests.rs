//! Integration tests for the CLI binary.
//!
//! Verifies that the `attend` binary responds to basic flags and can run a
//! session end to end against a temporary state directory.
//!
//! This test is registered as a [[test]] in the attendance-integrity-cli
//! crate so that CARGO_BIN_EXE_attend is available.

use std::path::Path;
use std::process::{Command, Output};

/// Get a Command pointing to the `attend` binary.
fn attend_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_attend"))
}

fn run(state: &Path, args: &[&str]) -> Output {
    attend_binary()
        .arg("--state")
        .arg(state)
        .args(args)
        .output()
        .expect("failed to execute attend")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn assert_ok(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_responds_to_help() {
    let output = attend_binary()
        .arg("--help")
        .output()
        .expect("failed to execute attend --help");

    assert_ok(&output, "attend --help");
    let stdout = stdout(&output);
    assert!(
        stdout.contains("attend") || stdout.contains("Usage"),
        "attend --help output should contain usage information, got: {stdout}"
    );
}

#[test]
fn cli_responds_to_version() {
    let output = attend_binary()
        .arg("--version")
        .output()
        .expect("failed to execute attend --version");

    assert_ok(&output, "attend --version");
    let stdout = stdout(&output);
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "attend --version should contain version info, got: {stdout}"
    );
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = attend_binary()
        .arg("--nonexistent-flag")
        .output()
        .expect("failed to execute attend");

    assert!(
        !output.status.success(),
        "attend with unknown flag should exit with error"
    );
}

#[test]
fn cli_requires_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), &["--as", "prof", "session", "active"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("directory init"));
}

#[test]
fn cli_session_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path();

    assert_ok(&run(state, &["directory", "init"]), "directory init");
    assert_ok(
        &run(state, &["directory", "add-course", "--id", "MCA-101", "--name", "Data Structures"]),
        "add-course",
    );
    assert_ok(
        &run(state, &["directory", "add-account", "--id", "prof", "--name", "Prof", "--role", "teacher"]),
        "add teacher",
    );
    for id in ["s-1", "s-2"] {
        assert_ok(
            &run(state, &["directory", "add-account", "--id", id, "--name", id, "--role", "student"]),
            "add student",
        );
        assert_ok(
            &run(state, &["directory", "enroll", "--course", "MCA-101", "--student", id]),
            "enroll",
        );
    }

    // Start a session and read back its ID.
    let output = run(
        state,
        &["--as", "prof", "--json", "session", "start", "--course", "MCA-101", "--lat", "12.9716", "--lon", "77.5946"],
    );
    assert_ok(&output, "session start");
    let session: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let session_id = session["id"].as_str().unwrap().to_string();

    let output = run(state, &["--as", "prof", "session", "token", &session_id]);
    assert_ok(&output, "session token");
    let token = stdout(&output).trim().to_string();

    let output = run(
        state,
        &[
            "--as", "s-1", "claim", "--session", &session_id, "--token", &token, "--device",
            "phone-1", "--lat", "12.9716", "--lon", "77.5946",
        ],
    );
    assert_ok(&output, "claim");

    // Students cannot end sessions.
    let output = run(state, &["--as", "s-1", "session", "end", &session_id]);
    assert!(!output.status.success());

    let output = run(state, &["--as", "prof", "session", "end", &session_id]);
    assert_ok(&output, "session end");
    assert!(stdout(&output).contains("Absent:   1"));

    let output = run(state, &["--as", "prof", "--json", "stats", "course", "--course", "MCA-101"]);
    assert_ok(&output, "stats course");
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["sessions"], 1);
    assert_eq!(report["rows"].as_array().unwrap().len(), 2);
}
